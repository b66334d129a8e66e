use std::collections::BTreeSet;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errdata;
use crate::error::Result;

/// In-memory state of one set: distinct member byte strings. A BTreeSet
/// keeps iteration, and therefore spop selection, deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetState {
    members: BTreeSet<Vec<u8>>,
}

impl SetState {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn insert(&mut self, member: Vec<u8>) -> bool {
        self.members.insert(member)
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.members.remove(member)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains(member)
    }

    /// The member spop would take next: the smallest in byte order.
    pub fn first(&self) -> Option<&Vec<u8>> {
        self.members.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.members.iter()
    }

    /// Members of `self` not present in `other`.
    pub fn difference(&self, other: &SetState) -> Vec<Vec<u8>> {
        self.members.difference(&other.members).cloned().collect()
    }

    /// Members of either set, deduplicated.
    pub fn union(&self, other: &SetState) -> Vec<Vec<u8>> {
        self.members.union(&other.members).cloned().collect()
    }
}

/// Payload of a set-move record: destination bucket and key, then the
/// member being moved. The record's own bucket/key name the source set.
pub fn encode_smove(dst_bucket: &[u8], dst_key: &[u8], member: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + dst_bucket.len() + dst_key.len() + member.len());
    buf.write_u32::<LittleEndian>(dst_bucket.len() as u32).unwrap();
    buf.extend_from_slice(dst_bucket);
    buf.write_u32::<LittleEndian>(dst_key.len() as u32).unwrap();
    buf.extend_from_slice(dst_key);
    buf.extend_from_slice(member);
    buf
}

pub fn decode_smove(buf: &[u8]) -> Result<(&[u8], &[u8], &[u8])> {
    if buf.len() < 4 {
        return Err(errdata!("short smove payload"));
    }
    let bucket_len = Cursor::new(buf).read_u32::<LittleEndian>()? as usize;
    let key_len_at = 4 + bucket_len;
    if buf.len() < key_len_at + 4 {
        return Err(errdata!("short smove payload"));
    }
    let key_len = Cursor::new(&buf[key_len_at..]).read_u32::<LittleEndian>()? as usize;
    let member_at = key_len_at + 4 + key_len;
    if buf.len() < member_at {
        return Err(errdata!("short smove payload"));
    }
    Ok((
        &buf[4..key_len_at],
        &buf[key_len_at + 4..member_at],
        &buf[member_at..],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(members: &[&[u8]]) -> SetState {
        let mut set = SetState::default();
        for m in members {
            set.insert(m.to_vec());
        }
        set
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = SetState::default();
        assert!(set.insert(b"a".to_vec()));
        assert!(!set.insert(b"a".to_vec()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_first_is_smallest() {
        let set = set_of(&[b"pear", b"apple", b"plum"]);
        assert_eq!(set.first(), Some(&b"apple".to_vec()));
    }

    #[test]
    fn test_difference_and_union() {
        let a = set_of(&[b"a", b"b", b"c"]);
        let b = set_of(&[b"b", b"d"]);

        assert_eq!(a.difference(&b), vec![b"a".to_vec(), b"c".to_vec()]);
        assert_eq!(b.difference(&a), vec![b"d".to_vec()]);
        assert_eq!(
            a.union(&b),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
    }

    #[test]
    fn test_smove_payload_round_trip() -> Result<()> {
        let buf = encode_smove(b"dst-bucket", b"dst-key", b"member");
        let (bucket, key, member) = decode_smove(&buf)?;
        assert_eq!(bucket, b"dst-bucket");
        assert_eq!(key, b"dst-key");
        assert_eq!(member, b"member");

        assert!(decode_smove(&buf[..3]).is_err());
        Ok(())
    }
}
