use sqk_types::{BlockRange, Squeak, SqueakHash};

/// Which downloaded squeaks are worth keeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadCriteria {
    /// Exactly one squeak, fetched on demand.
    Hash { squeak_hash: SqueakHash },
    /// Followed authors inside a block range.
    Range {
        block_range: BlockRange,
        follow_list: Vec<String>,
    },
}

impl DownloadCriteria {
    pub fn is_interested(&self, squeak: &Squeak) -> bool {
        match self {
            DownloadCriteria::Hash { squeak_hash } => squeak.hash() == *squeak_hash,
            DownloadCriteria::Range {
                block_range,
                follow_list,
            } => {
                block_range.contains(squeak.block_height)
                    && follow_list.contains(&squeak.author_address)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{rand::thread_rng, SecretKey};
    use bitcoin::BlockHash;
    use sqk_types::network::Network;

    fn squeak(height: u32) -> Squeak {
        let key = SecretKey::new(&mut thread_rng());
        Squeak::make(
            &key,
            Network::Simnet,
            "criteria",
            height,
            BlockHash::all_zeros(),
            None,
            0,
        )
        .unwrap()
        .0
    }

    #[test]
    fn hash_criteria_matches_only_its_squeak() {
        let squeak = squeak(5);

        let matching = DownloadCriteria::Hash {
            squeak_hash: squeak.hash(),
        };
        assert!(matching.is_interested(&squeak));

        let other = DownloadCriteria::Hash {
            squeak_hash: SqueakHash::from_byte_array([1u8; 32]),
        };
        assert!(!other.is_interested(&squeak));
    }

    #[test]
    fn range_criteria_needs_both_follow_and_range() {
        let squeak = squeak(50);

        let interested = DownloadCriteria::Range {
            block_range: BlockRange::new(0, 100),
            follow_list: vec![squeak.author_address.clone()],
        };
        assert!(interested.is_interested(&squeak));

        let not_followed = DownloadCriteria::Range {
            block_range: BlockRange::new(0, 100),
            follow_list: vec![],
        };
        assert!(!not_followed.is_interested(&squeak));

        let out_of_range = DownloadCriteria::Range {
            block_range: BlockRange::new(60, 100),
            follow_list: vec![squeak.author_address.clone()],
        };
        assert!(!out_of_range.is_interested(&squeak));
    }
}
