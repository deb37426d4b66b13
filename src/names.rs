use super::Result;
use crate::random;
use eyre::eyre;
use rand::Rng;

/// Longest name the kernel accepts for a network device
pub const DEVICE_NAME_MAX_LEN: usize = 15;

const DEFAULT_RANDOM_LEN: usize = 8;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn random_hex(len: usize) -> String {
    random::with_rng(|rng| {
        (0..len)
            .map(|_| char::from(HEX_DIGITS[rng.gen_range(0..HEX_DIGITS.len())]))
            .collect()
    })
}

/// Appends the same random suffix to every prefix.
///
/// With `max_length` each name is padded up to that length counted from the
/// longest prefix; without it the suffix is 8 hex characters.
pub fn get_related_rand_names(prefixes: &[&str], max_length: Option<usize>) -> Result<Vec<String>> {
    let len = match max_length {
        Some(max_length) => {
            let longest = prefixes.iter().map(|p| p.len()).max().unwrap_or(0);
            if max_length <= longest {
                return Err(eyre!("'max_length' must be longer than all prefixes"));
            }
            max_length - longest
        }
        None => DEFAULT_RANDOM_LEN,
    };

    let suffix = random_hex(len);
    Ok(prefixes.iter().map(|p| format!("{p}{suffix}")).collect())
}

pub fn get_rand_name(max_length: Option<usize>, prefix: &str) -> Result<String> {
    let mut names = get_related_rand_names(&[prefix], max_length)?;
    Ok(names.remove(0))
}

/// A random name that fits in a device name
pub fn get_rand_device_name(prefix: &str) -> Result<String> {
    get_rand_name(Some(DEVICE_NAME_MAX_LEN), prefix)
}

pub fn get_related_rand_device_names(prefixes: &[&str]) -> Result<Vec<String>> {
    get_related_rand_names(prefixes, Some(DEVICE_NAME_MAX_LEN))
}
