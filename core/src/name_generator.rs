//! Deterministic player name generation from curated name lists.
//!
//! Mostly Ghanaian family and given names, with a smaller share drawn
//! from a general list for variety. Same RNG seed, same names.

use crate::rng::StreamRng;

/// Share of players given a Ghanaian name.
const GHANAIAN_SHARE: f64 = 0.7;

const GHANAIAN_LAST: &[&str] = &[
    "Mensah", "Osei", "Owusu", "Addo", "Boateng", "Adjei", "Amankwah", "Kumah", "Yeboah",
    "Asante", "Nkrumah", "Annan", "Asamoah", "Appiah", "Kufuor", "Agyeman", "Baffour", "Danso",
];

const GHANAIAN_GIVEN: &[&str] = &[
    "Kwame", "Kwesi", "Kojo", "Kwabena", "Yaw", "Kofi", "Ama", "Abena", "Akua", "Yaa", "Afua",
    "Afia", "Emmanuel", "Elizabeth", "Grace", "Samuel", "Daniel", "Mary",
];

const GENERAL_LAST: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Miller", "Davis", "Wilson", "Taylor",
    "Clark", "Lewis", "Walker", "Hall", "Young", "King", "Wright", "Scott", "Green",
];

const GENERAL_GIVEN: &[&str] = &[
    "James", "John", "Robert", "Michael", "David", "Joseph", "Thomas", "Sarah", "Karen",
    "Nancy", "Lisa", "Betty", "Sandra", "Ashley", "Emily", "Laura", "Rachel", "Anna",
];

/// A generated (last name, other names) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerName {
    pub last_name:   String,
    pub other_names: String,
}

impl PlayerName {
    /// The single PLAYER_NAME field of a ticket export: "<last> <other>".
    pub fn display(&self) -> String {
        format!("{} {}", self.last_name, self.other_names)
    }
}

pub struct NameGenerator;

impl NameGenerator {
    pub fn generate(rng: &mut StreamRng) -> PlayerName {
        let (last, given) = if rng.chance(GHANAIAN_SHARE) {
            (GHANAIAN_LAST, GHANAIAN_GIVEN)
        } else {
            (GENERAL_LAST, GENERAL_GIVEN)
        };
        PlayerName {
            last_name: Self::pick(rng, last).to_string(),
            other_names: Self::pick(rng, given).to_string(),
        }
    }

    fn pick(rng: &mut StreamRng, names: &[&'static str]) -> &'static str {
        rng.pick(names).copied().unwrap_or("Unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{RngBank, Stream};

    #[test]
    fn names_are_deterministic_and_non_empty() {
        let bank = RngBank::new(12345);
        let mut a = bank.stream(Stream::Population);
        let mut b = bank.stream(Stream::Population);
        for _ in 0..50 {
            let x = NameGenerator::generate(&mut a);
            assert_eq!(x, NameGenerator::generate(&mut b));
            assert!(!x.last_name.is_empty());
            assert!(!x.other_names.is_empty());
            assert_eq!(x.display(), format!("{} {}", x.last_name, x.other_names));
        }
    }
}
