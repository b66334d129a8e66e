use super::{validate_bucket, validate_key, Tx};
use crate::errinput;
use crate::error::{Error, Result};
use crate::index::zset::{self, ScoreOpts, SortedSetMember, ZSetState};
use crate::log::record::{DataKind, Flag};

impl<'db> Tx<'db> {
    /// Inserts or rescores `key` in the bucket's sorted set. NaN scores are
    /// rejected; rescoring is a delete and reinsert under the hood.
    pub fn zadd(&mut self, bucket: &[u8], key: &[u8], score: f64, value: &[u8]) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;
        if score.is_nan() {
            return Err(errinput!("NaN score"));
        }

        self.stage(
            DataKind::ZSet,
            Flag::ZAdd,
            bucket,
            key,
            zset::encode_zadd(score, value),
            0,
        )?;
        self.ws_zset(bucket)?
            .insert(key.to_vec(), score, value.to_vec());
        Ok(())
    }

    /// Members at ranks `[start, end]`. Ranks are 1-based; negative ranks
    /// count from the end; out-of-bounds ranks clamp.
    pub fn zrange_by_rank(
        &self,
        bucket: &[u8],
        start: i64,
        end: i64,
    ) -> Result<Vec<SortedSetMember>> {
        validate_bucket(bucket)?;
        let set = self.zset_view(bucket)?.ok_or(Error::NotFound)?;
        match resolve_ranks(set.len(), start, end)? {
            Some((s, e)) => Ok(set.by_rank(s, e)),
            None => Ok(Vec::new()),
        }
    }

    /// Members with scores in `[min, max]`, ascending by (score, member),
    /// subject to `opts`.
    pub fn zrange_by_score(
        &self,
        bucket: &[u8],
        min: f64,
        max: f64,
        opts: &ScoreOpts,
    ) -> Result<Vec<SortedSetMember>> {
        validate_bucket(bucket)?;
        if min.is_nan() || max.is_nan() {
            return Err(errinput!("NaN score bound"));
        }
        let set = self.zset_view(bucket)?.ok_or(Error::NotFound)?;
        Ok(set.range_by_score(min, max, opts))
    }

    /// Number of members with scores in `[min, max]`, subject to `opts`.
    pub fn zcount(&self, bucket: &[u8], min: f64, max: f64, opts: &ScoreOpts) -> Result<usize> {
        Ok(self.zrange_by_score(bucket, min, max, opts)?.len())
    }

    /// The member with the lowest (score, key). `NotFound` when empty.
    pub fn zpeek_min(&self, bucket: &[u8]) -> Result<SortedSetMember> {
        validate_bucket(bucket)?;
        self.zset_view(bucket)?
            .and_then(|set| set.min())
            .ok_or(Error::NotFound)
    }

    /// The member with the highest (score, key). `NotFound` when empty.
    pub fn zpeek_max(&self, bucket: &[u8]) -> Result<SortedSetMember> {
        validate_bucket(bucket)?;
        self.zset_view(bucket)?
            .and_then(|set| set.max())
            .ok_or(Error::NotFound)
    }

    /// Removes and returns the member with the lowest (score, key).
    pub fn zpop_min(&mut self, bucket: &[u8]) -> Result<SortedSetMember> {
        self.check_writable()?;
        validate_bucket(bucket)?;

        let member = self
            .zset_view(bucket)?
            .and_then(|set| set.min())
            .ok_or(Error::NotFound)?;
        self.stage(DataKind::ZSet, Flag::ZPopMin, bucket, &member.key, Vec::new(), 0)?;
        self.ws_zset(bucket)?.remove(&member.key);
        Ok(member)
    }

    /// Removes and returns the member with the highest (score, key).
    pub fn zpop_max(&mut self, bucket: &[u8]) -> Result<SortedSetMember> {
        self.check_writable()?;
        validate_bucket(bucket)?;

        let member = self
            .zset_view(bucket)?
            .and_then(|set| set.max())
            .ok_or(Error::NotFound)?;
        self.stage(DataKind::ZSet, Flag::ZPopMax, bucket, &member.key, Vec::new(), 0)?;
        self.ws_zset(bucket)?.remove(&member.key);
        Ok(member)
    }

    /// 1-based rank of `key` in ascending (score, member) order.
    pub fn zrank(&self, bucket: &[u8], key: &[u8]) -> Result<usize> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        self.zset_view(bucket)?
            .and_then(|set| set.rank(key))
            .map(|rank| rank + 1)
            .ok_or(Error::NotFound)
    }

    pub fn zscore(&self, bucket: &[u8], key: &[u8]) -> Result<f64> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        self.zset_view(bucket)?
            .and_then(|set| set.score(key))
            .ok_or(Error::NotFound)
    }

    /// Removes `key` from the sorted set. `NotFound` when absent.
    pub fn zrem(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        let present = self
            .zset_view(bucket)?
            .map(|set| set.contains(key))
            .unwrap_or(false);
        if !present {
            return Err(Error::NotFound);
        }
        self.stage(DataKind::ZSet, Flag::ZRem, bucket, key, Vec::new(), 0)?;
        self.ws_zset(bucket)?.remove(key);
        Ok(())
    }

    /// Removes members at ranks `[start, end]` (1-based, negatives from
    /// the end), returning how many were removed.
    pub fn zrem_range_by_rank(&mut self, bucket: &[u8], start: i64, end: i64) -> Result<usize> {
        self.check_writable()?;
        validate_bucket(bucket)?;

        let len = self.zset_view(bucket)?.ok_or(Error::NotFound)?.len();
        let Some((s, e)) = resolve_ranks(len, start, end)? else {
            return Ok(0);
        };

        self.stage(
            DataKind::ZSet,
            Flag::ZRemRangeByRank,
            bucket,
            b"",
            zset::encode_rank_range(s as u64, e as u64),
            0,
        )?;
        Ok(self.ws_zset(bucket)?.remove_rank_range(s, e))
    }

    /// Number of members; 0 for a missing sorted set.
    pub fn zcard(&self, bucket: &[u8]) -> Result<usize> {
        validate_bucket(bucket)?;
        Ok(self.zset_view(bucket)?.map(|set| set.len()).unwrap_or(0))
    }

    /// All members in ascending (score, member) order. `NotFound` for a
    /// missing sorted set.
    pub fn zmembers(&self, bucket: &[u8]) -> Result<Vec<SortedSetMember>> {
        validate_bucket(bucket)?;
        let set = self.zset_view(bucket)?.ok_or(Error::NotFound)?;
        Ok(set.members())
    }

    /// Looks up one member by key.
    pub fn zget_by_key(&self, bucket: &[u8], key: &[u8]) -> Result<SortedSetMember> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        self.zset_view(bucket)?
            .and_then(|set| set.get(key))
            .ok_or(Error::NotFound)
    }

    fn zset_view(&self, bucket: &[u8]) -> Result<Option<&ZSetState>> {
        if let Some(set) = self.ws.zsets.get(bucket) {
            return Ok(Some(set));
        }
        Ok(self.core()?.state.zset(bucket))
    }

    fn ws_zset(&mut self, bucket: &[u8]) -> Result<&mut ZSetState> {
        if !self.ws.zsets.contains_key(bucket) {
            let snapshot = self.core()?.state.zset_snapshot(bucket);
            self.ws.zsets.insert(bucket.to_vec(), snapshot);
        }
        Ok(self.ws.zsets.get_mut(bucket).expect("just inserted"))
    }
}

/// Maps a 1-based rank pair (negatives from the end) to clamped 0-based
/// positions; None when the window is empty. Rank 0 is malformed.
fn resolve_ranks(len: usize, start: i64, end: i64) -> Result<Option<(usize, usize)>> {
    if start == 0 || end == 0 {
        return Err(errinput!("ranks are 1-based"));
    }
    if len == 0 {
        return Ok(None);
    }
    let len = len as i64;
    let mut s = if start > 0 { start - 1 } else { len + start };
    let mut e = if end > 0 { end - 1 } else { len + end };
    if s < 0 {
        s = 0;
    }
    if e >= len {
        e = len - 1;
    }
    if s > e || s >= len {
        Ok(None)
    } else {
        Ok(Some((s as usize, e as usize)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ranks() -> Result<()> {
        // 1-based from the front.
        assert_eq!(resolve_ranks(5, 1, 3)?, Some((0, 2)));
        // Negative ranks from the end.
        assert_eq!(resolve_ranks(5, -2, -1)?, Some((3, 4)));
        assert_eq!(resolve_ranks(5, 1, -1)?, Some((0, 4)));
        // Clamping.
        assert_eq!(resolve_ranks(5, -100, 100)?, Some((0, 4)));
        // Empty windows.
        assert_eq!(resolve_ranks(5, 4, 2)?, None);
        assert_eq!(resolve_ranks(0, 1, -1)?, None);
        // Rank 0 is malformed.
        assert!(resolve_ranks(5, 0, 2).is_err());
        Ok(())
    }
}
