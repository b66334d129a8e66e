use super::{validate_bucket, validate_key, Tx};
use crate::errinput;
use crate::error::{Error, Result};
use crate::index::list::{self, ListState, ValueRef};
use crate::log::record::{DataKind, Flag};

impl<'db> Tx<'db> {
    /// Appends values to the tail of the list, one log record per element.
    pub fn rpush(&mut self, bucket: &[u8], key: &[u8], values: &[&[u8]]) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;
        if values.is_empty() {
            return Err(errinput!("no values given"));
        }
        for value in values {
            self.stage(DataKind::List, Flag::ListRPush, bucket, key, value.to_vec(), 0)?;
            self.ws_list(bucket, key)?
                .rpush(ValueRef::Staged(value.to_vec()));
        }
        Ok(())
    }

    /// Prepends values to the head of the list, one log record per element.
    pub fn lpush(&mut self, bucket: &[u8], key: &[u8], values: &[&[u8]]) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;
        if values.is_empty() {
            return Err(errinput!("no values given"));
        }
        for value in values {
            self.stage(DataKind::List, Flag::ListLPush, bucket, key, value.to_vec(), 0)?;
            self.ws_list(bucket, key)?
                .lpush(ValueRef::Staged(value.to_vec()));
        }
        Ok(())
    }

    /// Removes and returns the head element. `NotFound` on a missing or
    /// empty list.
    pub fn lpop(&mut self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        let head = self
            .list_view(bucket, key)?
            .and_then(|list| list.lpeek().cloned())
            .ok_or(Error::NotFound)?;
        let value = self.resolve_ref(&head)?;

        self.stage(DataKind::List, Flag::ListLPop, bucket, key, Vec::new(), 0)?;
        self.ws_list(bucket, key)?.lpop();
        Ok(value)
    }

    /// Removes and returns the tail element. `NotFound` on a missing or
    /// empty list.
    pub fn rpop(&mut self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        let tail = self
            .list_view(bucket, key)?
            .and_then(|list| list.rpeek().cloned())
            .ok_or(Error::NotFound)?;
        let value = self.resolve_ref(&tail)?;

        self.stage(DataKind::List, Flag::ListRPop, bucket, key, Vec::new(), 0)?;
        self.ws_list(bucket, key)?.rpop();
        Ok(value)
    }

    /// Returns the head element without removing it.
    pub fn lpeek(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let head = self
            .list_view(bucket, key)?
            .and_then(|list| list.lpeek().cloned())
            .ok_or(Error::NotFound)?;
        self.resolve_ref(&head)
    }

    /// Returns the tail element without removing it.
    pub fn rpeek(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let tail = self
            .list_view(bucket, key)?
            .and_then(|list| list.rpeek().cloned())
            .ok_or(Error::NotFound)?;
        self.resolve_ref(&tail)
    }

    /// Elements at indices `[start, end]`, inclusive; negative indices
    /// count from the tail; out-of-bounds indices clamp.
    pub fn lrange(&self, bucket: &[u8], key: &[u8], start: i64, end: i64) -> Result<Vec<Vec<u8>>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let list = self.list_view(bucket, key)?.ok_or(Error::NotFound)?;
        let Some((s, e)) = list.resolve_range(start, end) else {
            return Ok(Vec::new());
        };
        list.iter()
            .skip(s)
            .take(e - s + 1)
            .map(|(_, vref)| self.resolve_ref(vref))
            .collect()
    }

    /// Removes elements equal to `value`: `count > 0` from the head,
    /// `count < 0` from the tail, `count == 0` all of them. Returns how
    /// many were removed.
    pub fn lrem(&mut self, bucket: &[u8], key: &[u8], count: i64, value: &[u8]) -> Result<usize> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        let seqs = {
            let list = self.list_view(bucket, key)?.ok_or(Error::NotFound)?;
            list::lrem_seqs(list, count, value, |vref| self.resolve_ref(vref))?
        };

        self.stage(
            DataKind::List,
            Flag::ListLRem,
            bucket,
            key,
            list::encode_lrem(count, value),
            0,
        )?;
        self.ws_list(bucket, key)?.remove_seqs(&seqs);
        Ok(seqs.len())
    }

    /// Overwrites the element at `index` (negative counts from the tail).
    /// Out-of-range indices are rejected.
    pub fn lset(&mut self, bucket: &[u8], key: &[u8], index: i64, value: &[u8]) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        let pos = self
            .list_view(bucket, key)?
            .ok_or(Error::NotFound)?
            .resolve_index(index)
            .ok_or_else(|| errinput!("index {index} out of range"))?;

        self.stage(
            DataKind::List,
            Flag::ListLSet,
            bucket,
            key,
            list::encode_lset(pos as u64, value),
            0,
        )?;
        let list = self.ws_list(bucket, key)?;
        if let Some(seq) = list.nth_seq(pos) {
            list.set(seq, ValueRef::Staged(value.to_vec()));
        }
        Ok(())
    }

    /// Retains only the elements at indices `[start, end]`, inclusive; an
    /// empty window clears the list.
    pub fn ltrim(&mut self, bucket: &[u8], key: &[u8], start: i64, end: i64) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        let window = self
            .list_view(bucket, key)?
            .ok_or(Error::NotFound)?
            .resolve_range(start, end);
        // An empty window is journaled as the inverted pair (1, 0), which
        // retains nothing on replay.
        let (s, e) = window.unwrap_or((1, 0));

        self.stage(
            DataKind::List,
            Flag::ListLTrim,
            bucket,
            key,
            list::encode_ltrim(s as u64, e as u64),
            0,
        )?;
        self.ws_list(bucket, key)?.trim_positions(s, e);
        Ok(())
    }

    /// Number of elements; 0 for a missing list.
    pub fn lsize(&self, bucket: &[u8], key: &[u8]) -> Result<usize> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.list_view(bucket, key)?.map(|l| l.len()).unwrap_or(0))
    }

    /// The list as this transaction sees it: the working copy when touched,
    /// the committed state otherwise.
    fn list_view(&self, bucket: &[u8], key: &[u8]) -> Result<Option<&ListState>> {
        if let Some(list) = self.ws.lists.get(&(bucket.to_vec(), key.to_vec())) {
            return Ok(Some(list));
        }
        Ok(self.core()?.state.list(bucket, key))
    }

    /// The working copy, cloned from committed state on first touch.
    fn ws_list(&mut self, bucket: &[u8], key: &[u8]) -> Result<&mut ListState> {
        let wkey = (bucket.to_vec(), key.to_vec());
        if !self.ws.lists.contains_key(&wkey) {
            let snapshot = self.core()?.state.list_snapshot(bucket, key);
            self.ws.lists.insert(wkey.clone(), snapshot);
        }
        Ok(self.ws.lists.get_mut(&wkey).expect("just inserted"))
    }
}
