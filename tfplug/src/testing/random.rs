//! Random values for naming test infrastructure

use rand::distributions::uniform::SampleUniform;
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// Uniform value in `[min, max)`. An empty range yields `min`.
pub fn rand_int_range<T>(min: T, max: T) -> T
where
    T: SampleUniform + PartialOrd + Copy,
{
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..max)
}

/// Every suffix handed out so far. Grows by one per call for the life of
/// the process, so it stays as small as the number of names tests ask for.
fn issued() -> &'static Mutex<HashSet<u64>> {
    static ISSUED: OnceLock<Mutex<HashSet<u64>>> = OnceLock::new();
    ISSUED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// `<prefix>-<digits>`, never repeated within the process so that
/// concurrently running tests get distinct names
pub fn random_with_prefix(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix = loop {
        let candidate = rng.gen_range(1_000_000_000_000_000_000u64..u64::MAX);
        let mut issued = match issued().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if issued.insert(candidate) {
            break candidate;
        }
    };
    format!("{}-{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_half_open() {
        for _ in 0..1000 {
            let asn = rand_int_range(64512, 65535);
            assert!((64512..=65534).contains(&asn));
            let octet = rand_int_range(1, 255);
            assert!((1..=254).contains(&octet));
        }
    }

    #[test]
    fn empty_range_returns_min() {
        assert_eq!(rand_int_range(5, 5), 5);
        assert_eq!(rand_int_range(9, 3), 9);
    }

    #[test]
    fn prefixed_names_are_unique() {
        let names: HashSet<String> = (0..500).map(|_| random_with_prefix("tf-acc-test")).collect();
        assert_eq!(names.len(), 500);
        assert!(names.iter().all(|n| n.starts_with("tf-acc-test-")));
    }
}
