use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Cursor;
use std::ops::Bound;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crossbeam_skiplist::SkipMap;

use crate::errdata;
use crate::error::Result;

/// Skip-list key: score first, ties broken by member-key byte order.
/// Scores are compared with `total_cmp`; NaN is rejected at the write
/// surface so it never reaches the index.
#[derive(Debug, Clone)]
pub struct ScoreKey {
    pub score: f64,
    pub member: Vec<u8>,
}

impl PartialEq for ScoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoreKey {}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

/// One sorted-set member as returned to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedSetMember {
    pub key: Vec<u8>,
    pub score: f64,
    pub value: Vec<u8>,
}

/// Options for score-bounded queries. A zero limit means unbounded;
/// `exclude_start`/`exclude_end` drop members whose score equals the
/// respective bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreOpts {
    pub limit: usize,
    pub exclude_start: bool,
    pub exclude_end: bool,
}

/// In-memory state of one bucket's sorted set: a skip list ordered by
/// (score, member-key) holding the value bytes, plus a member → score side
/// map for O(1) score lookups and rescoring by delete+reinsert.
#[derive(Debug, Default)]
pub struct ZSetState {
    by_score: SkipMap<ScoreKey, Vec<u8>>,
    members: HashMap<Vec<u8>, f64>,
}

impl Clone for ZSetState {
    fn clone(&self) -> Self {
        let clone = ZSetState::default();
        for entry in self.by_score.iter() {
            clone.by_score.insert(entry.key().clone(), entry.value().clone());
        }
        Self {
            by_score: clone.by_score,
            members: self.members.clone(),
        }
    }
}

impl ZSetState {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Inserts or rescores a member.
    pub fn insert(&mut self, member: Vec<u8>, score: f64, value: Vec<u8>) {
        if let Some(old) = self.members.insert(member.clone(), score) {
            self.by_score.remove(&ScoreKey {
                score: old,
                member: member.clone(),
            });
        }
        self.by_score.insert(ScoreKey { score, member }, value);
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.members.remove(member) {
            Some(score) => {
                self.by_score.remove(&ScoreKey {
                    score,
                    member: member.to_vec(),
                });
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains_key(member)
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.members.get(member).copied()
    }

    pub fn get(&self, member: &[u8]) -> Option<SortedSetMember> {
        let score = self.score(member)?;
        let entry = self.by_score.get(&ScoreKey {
            score,
            member: member.to_vec(),
        })?;
        Some(SortedSetMember {
            key: member.to_vec(),
            score,
            value: entry.value().clone(),
        })
    }

    pub fn min(&self) -> Option<SortedSetMember> {
        self.by_score.front().map(|e| SortedSetMember {
            key: e.key().member.clone(),
            score: e.key().score,
            value: e.value().clone(),
        })
    }

    pub fn max(&self) -> Option<SortedSetMember> {
        self.by_score.back().map(|e| SortedSetMember {
            key: e.key().member.clone(),
            score: e.key().score,
            value: e.value().clone(),
        })
    }

    pub fn pop_min(&mut self) -> Option<SortedSetMember> {
        let member = self.min()?;
        self.remove(&member.key);
        Some(member)
    }

    pub fn pop_max(&mut self) -> Option<SortedSetMember> {
        let member = self.max()?;
        self.remove(&member.key);
        Some(member)
    }

    /// 0-based rank of a member in ascending (score, member) order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.score(member)?;
        let target = ScoreKey {
            score,
            member: member.to_vec(),
        };
        Some(
            self.by_score
                .range((Bound::Unbounded, Bound::Excluded(target)))
                .count(),
        )
    }

    /// All members in ascending (score, member) order.
    pub fn members(&self) -> Vec<SortedSetMember> {
        self.by_score
            .iter()
            .map(|e| SortedSetMember {
                key: e.key().member.clone(),
                score: e.key().score,
                value: e.value().clone(),
            })
            .collect()
    }

    /// Members at 0-based ranks `start..=end`.
    pub fn by_rank(&self, start: usize, end: usize) -> Vec<SortedSetMember> {
        self.by_score
            .iter()
            .skip(start)
            .take(end.saturating_sub(start) + 1)
            .map(|e| SortedSetMember {
                key: e.key().member.clone(),
                score: e.key().score,
                value: e.value().clone(),
            })
            .collect()
    }

    /// Removes members at 0-based ranks `start..=end`, returning how many.
    pub fn remove_rank_range(&mut self, start: usize, end: usize) -> usize {
        let doomed: Vec<Vec<u8>> = self
            .by_rank(start, end)
            .into_iter()
            .map(|m| m.key)
            .collect();
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    /// Members with scores in `[min, max]` (bounds adjusted per `opts`),
    /// ascending by (score, member).
    pub fn range_by_score(&self, min: f64, max: f64, opts: &ScoreOpts) -> Vec<SortedSetMember> {
        let start = Bound::Included(ScoreKey {
            score: min,
            member: Vec::new(),
        });
        let mut out = Vec::new();
        for entry in self.by_score.range((start, Bound::Unbounded)) {
            let key = entry.key();
            if key.score > max {
                break;
            }
            if opts.exclude_start && key.score == min {
                continue;
            }
            if opts.exclude_end && key.score == max {
                continue;
            }
            out.push(SortedSetMember {
                key: key.member.clone(),
                score: key.score,
                value: entry.value().clone(),
            });
            if opts.limit != 0 && out.len() == opts.limit {
                break;
            }
        }
        out
    }
}

/// Payload of a zset-add record: score bits then the value bytes. The
/// record's key field carries the member key.
pub fn encode_zadd(score: f64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.write_f64::<LittleEndian>(score).unwrap();
    buf.extend_from_slice(value);
    buf
}

pub fn decode_zadd(buf: &[u8]) -> Result<(f64, &[u8])> {
    if buf.len() < 8 {
        return Err(errdata!("short zadd payload"));
    }
    let score = Cursor::new(buf).read_f64::<LittleEndian>()?;
    Ok((score, &buf[8..]))
}

/// Payload of a rem-range-by-rank record: the normalized 0-based inclusive
/// rank window.
pub fn encode_rank_range(start: u64, end: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.write_u64::<LittleEndian>(start).unwrap();
    buf.write_u64::<LittleEndian>(end).unwrap();
    buf
}

pub fn decode_rank_range(buf: &[u8]) -> Result<(u64, u64)> {
    if buf.len() < 16 {
        return Err(errdata!("short rank-range payload"));
    }
    let mut cursor = Cursor::new(buf);
    let start = cursor.read_u64::<LittleEndian>()?;
    let end = cursor.read_u64::<LittleEndian>()?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(members: &[(&[u8], f64)]) -> ZSetState {
        let mut state = ZSetState::default();
        for (member, score) in members {
            state.insert(member.to_vec(), *score, member.to_vec());
        }
        state
    }

    fn keys(members: &[SortedSetMember]) -> Vec<Vec<u8>> {
        members.iter().map(|m| m.key.clone()).collect()
    }

    #[test]
    fn test_score_order_with_ties() {
        let state = state_with(&[(b"b", 2.0), (b"a", 2.0), (b"c", 1.0)]);

        assert_eq!(
            keys(&state.members()),
            vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn test_rescore_moves_member() {
        let mut state = state_with(&[(b"a", 1.0), (b"b", 2.0)]);
        state.insert(b"a".to_vec(), 3.0, b"a2".to_vec());

        assert_eq!(state.len(), 2);
        assert_eq!(keys(&state.members()), vec![b"b".to_vec(), b"a".to_vec()]);
        assert_eq!(state.get(b"a").unwrap().value, b"a2".to_vec());
    }

    #[test]
    fn test_rank_and_by_rank() {
        let state = state_with(&[(b"a", 10.0), (b"b", 20.0), (b"c", 30.0)]);

        assert_eq!(state.rank(b"a"), Some(0));
        assert_eq!(state.rank(b"c"), Some(2));
        assert_eq!(state.rank(b"missing"), None);
        assert_eq!(keys(&state.by_rank(1, 2)), vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_pop_both_ends() {
        let mut state = state_with(&[(b"a", 10.0), (b"b", 20.0), (b"c", 30.0)]);

        assert_eq!(state.pop_min().unwrap().key, b"a".to_vec());
        assert_eq!(state.pop_max().unwrap().key, b"c".to_vec());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_range_by_score_options() {
        let state = state_with(&[(b"a", 10.0), (b"b", 20.0), (b"c", 20.0), (b"d", 30.0)]);

        let all = state.range_by_score(10.0, 30.0, &ScoreOpts::default());
        assert_eq!(
            keys(&all),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );

        let exclusive = state.range_by_score(
            10.0,
            30.0,
            &ScoreOpts {
                exclude_start: true,
                exclude_end: true,
                ..Default::default()
            },
        );
        assert_eq!(keys(&exclusive), vec![b"b".to_vec(), b"c".to_vec()]);

        let limited = state.range_by_score(
            10.0,
            30.0,
            &ScoreOpts {
                limit: 2,
                ..Default::default()
            },
        );
        assert_eq!(keys(&limited), vec![b"a".to_vec(), b"b".to_vec()]);

        assert!(state.range_by_score(31.0, 40.0, &ScoreOpts::default()).is_empty());
        assert!(state.range_by_score(30.0, 10.0, &ScoreOpts::default()).is_empty());
    }

    #[test]
    fn test_remove_rank_range() {
        let mut state = state_with(&[(b"a", 1.0), (b"b", 2.0), (b"c", 3.0), (b"d", 4.0)]);

        assert_eq!(state.remove_rank_range(1, 2), 2);
        assert_eq!(keys(&state.members()), vec![b"a".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn test_negative_scores_sort_first() {
        let state = state_with(&[(b"pos", 1.5), (b"neg", -2.5), (b"zero", 0.0)]);
        assert_eq!(
            keys(&state.members()),
            vec![b"neg".to_vec(), b"zero".to_vec(), b"pos".to_vec()]
        );
    }

    #[test]
    fn test_payload_codecs() -> Result<()> {
        let zadd_buf = encode_zadd(86.5, b"v3");
        let (score, value) = decode_zadd(&zadd_buf)?;
        assert_eq!(score, 86.5);
        assert_eq!(value, b"v3");

        assert_eq!(decode_rank_range(&encode_rank_range(0, 4))?, (0, 4));
        assert!(decode_zadd(&[0u8; 7]).is_err());
        Ok(())
    }
}
