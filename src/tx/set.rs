use super::{validate_bucket, validate_key, Tx};
use crate::errinput;
use crate::error::{Error, Result};
use crate::index::set::{self, SetState};
use crate::log::record::{DataKind, Flag};

impl<'db> Tx<'db> {
    /// Adds members to the set, one log record per member.
    pub fn sadd(&mut self, bucket: &[u8], key: &[u8], members: &[&[u8]]) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;
        if members.is_empty() {
            return Err(errinput!("no members given"));
        }
        for member in members {
            self.stage(DataKind::Set, Flag::SetAdd, bucket, key, member.to_vec(), 0)?;
            self.ws_set(bucket, key)?.insert(member.to_vec());
        }
        Ok(())
    }

    /// Removes members from the set. Removing an absent member is a no-op.
    pub fn srem(&mut self, bucket: &[u8], key: &[u8], members: &[&[u8]]) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;
        if members.is_empty() {
            return Err(errinput!("no members given"));
        }
        for member in members {
            self.stage(DataKind::Set, Flag::SetRem, bucket, key, member.to_vec(), 0)?;
            self.ws_set(bucket, key)?.remove(member);
        }
        Ok(())
    }

    /// Number of members; 0 for a missing set.
    pub fn scard(&self, bucket: &[u8], key: &[u8]) -> Result<usize> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.set_view(bucket, key)?.map(|s| s.len()).unwrap_or(0))
    }

    /// All members in byte order. `NotFound` for a missing set.
    pub fn smembers(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<Vec<u8>>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let set = self.set_view(bucket, key)?.ok_or(Error::NotFound)?;
        Ok(set.iter().cloned().collect())
    }

    pub fn sismember(&self, bucket: &[u8], key: &[u8], member: &[u8]) -> Result<bool> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self
            .set_view(bucket, key)?
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    /// Whether every given member is present.
    pub fn sare_members(&self, bucket: &[u8], key: &[u8], members: &[&[u8]]) -> Result<bool> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let Some(set) = self.set_view(bucket, key)? else {
            return Ok(false);
        };
        Ok(members.iter().all(|m| set.contains(m)))
    }

    /// Whether the set exists and is non-empty.
    pub fn shas_key(&self, bucket: &[u8], key: &[u8]) -> Result<bool> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.set_view(bucket, key)?.map(|s| !s.is_empty()).unwrap_or(false))
    }

    /// Removes and returns one member, the smallest in byte order, so
    /// selection is deterministic. `NotFound` on a missing or empty set.
    pub fn spop(&mut self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        let member = self
            .set_view(bucket, key)?
            .and_then(|set| set.first().cloned())
            .ok_or(Error::NotFound)?;

        // The popped member is recorded so replay removes exactly it.
        self.stage(DataKind::Set, Flag::SetPop, bucket, key, member.clone(), 0)?;
        self.ws_set(bucket, key)?.remove(&member);
        Ok(member)
    }

    /// Moves `member` between two sets of the same bucket. Returns whether
    /// the member was present in the source.
    pub fn smove_one_bucket(
        &mut self,
        bucket: &[u8],
        src_key: &[u8],
        dst_key: &[u8],
        member: &[u8],
    ) -> Result<bool> {
        self.smove(bucket, src_key, bucket, dst_key, member)
    }

    /// Moves `member` between sets in two buckets. Returns whether the
    /// member was present in the source.
    pub fn smove_two_buckets(
        &mut self,
        src_bucket: &[u8],
        src_key: &[u8],
        dst_bucket: &[u8],
        dst_key: &[u8],
        member: &[u8],
    ) -> Result<bool> {
        self.smove(src_bucket, src_key, dst_bucket, dst_key, member)
    }

    fn smove(
        &mut self,
        src_bucket: &[u8],
        src_key: &[u8],
        dst_bucket: &[u8],
        dst_key: &[u8],
        member: &[u8],
    ) -> Result<bool> {
        self.check_writable()?;
        validate_bucket(src_bucket)?;
        validate_key(src_key)?;
        validate_bucket(dst_bucket)?;
        validate_key(dst_key)?;

        let present = self
            .set_view(src_bucket, src_key)?
            .map(|set| set.contains(member))
            .unwrap_or(false);
        if !present {
            return Ok(false);
        }

        self.stage(
            DataKind::Set,
            Flag::SetMove,
            src_bucket,
            src_key,
            set::encode_smove(dst_bucket, dst_key, member),
            0,
        )?;
        self.ws_set(src_bucket, src_key)?.remove(member);
        self.ws_set(dst_bucket, dst_key)?.insert(member.to_vec());
        Ok(true)
    }

    /// Members of the first set not present in the second (same bucket).
    pub fn sdiff_one_bucket(
        &self,
        bucket: &[u8],
        key1: &[u8],
        key2: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        self.sdiff(bucket, key1, bucket, key2)
    }

    /// Members of the first set not present in the second (two buckets).
    pub fn sdiff_two_buckets(
        &self,
        bucket1: &[u8],
        key1: &[u8],
        bucket2: &[u8],
        key2: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        self.sdiff(bucket1, key1, bucket2, key2)
    }

    fn sdiff(
        &self,
        bucket1: &[u8],
        key1: &[u8],
        bucket2: &[u8],
        key2: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        validate_bucket(bucket1)?;
        validate_key(key1)?;
        validate_bucket(bucket2)?;
        validate_key(key2)?;

        let first = self.set_view(bucket1, key1)?.ok_or(Error::NotFound)?;
        match self.set_view(bucket2, key2)? {
            Some(second) => Ok(first.difference(second)),
            None => Ok(first.iter().cloned().collect()),
        }
    }

    /// Union of two sets in the same bucket.
    pub fn sunion_one_bucket(
        &self,
        bucket: &[u8],
        key1: &[u8],
        key2: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        self.sunion(bucket, key1, bucket, key2)
    }

    /// Union of two sets across buckets.
    pub fn sunion_two_buckets(
        &self,
        bucket1: &[u8],
        key1: &[u8],
        bucket2: &[u8],
        key2: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        self.sunion(bucket1, key1, bucket2, key2)
    }

    fn sunion(
        &self,
        bucket1: &[u8],
        key1: &[u8],
        bucket2: &[u8],
        key2: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        validate_bucket(bucket1)?;
        validate_key(key1)?;
        validate_bucket(bucket2)?;
        validate_key(key2)?;

        match (self.set_view(bucket1, key1)?, self.set_view(bucket2, key2)?) {
            (Some(first), Some(second)) => Ok(first.union(second)),
            (Some(only), None) | (None, Some(only)) => Ok(only.iter().cloned().collect()),
            (None, None) => Err(Error::NotFound),
        }
    }

    fn set_view(&self, bucket: &[u8], key: &[u8]) -> Result<Option<&SetState>> {
        if let Some(set) = self.ws.sets.get(&(bucket.to_vec(), key.to_vec())) {
            return Ok(Some(set));
        }
        Ok(self.core()?.state.set(bucket, key))
    }

    fn ws_set(&mut self, bucket: &[u8], key: &[u8]) -> Result<&mut SetState> {
        let wkey = (bucket.to_vec(), key.to_vec());
        if !self.ws.sets.contains_key(&wkey) {
            let snapshot = self.core()?.state.set_snapshot(bucket, key);
            self.ws.sets.insert(wkey.clone(), snapshot);
        }
        Ok(self.ws.sets.get_mut(&wkey).expect("just inserted"))
    }
}
