//! String encryption: each string literal is sealed into a module record and
//! replaced by an [`Expr::Decrypt`] evaluated at the use site, so plaintext
//! only exists while the value is live.

use rand::Rng;

use hos_core::crypto::{self, CryptoError};
use hos_core::ir::{EncryptionRecord, Expr};

pub fn encrypt_literal<R: Rng>(
    records: &mut Vec<EncryptionRecord>,
    master: &[u8; 32],
    plaintext: &str,
    rng: &mut R,
) -> Result<Expr, CryptoError> {
    let salt: [u8; 16] = rng.gen();
    let iv: [u8; 16] = rng.gen();
    let record = crypto::seal(master, salt, iv, plaintext)?;
    records.push(record);
    Ok(Expr::Decrypt {
        record: records.len() as u32 - 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_record_opens_to_plaintext() {
        let master = [3u8; 32];
        let mut records = Vec::new();
        let mut rng = StdRng::seed_from_u64(11);
        let e = encrypt_literal(&mut records, &master, "top secret\0", &mut rng).unwrap();
        assert_eq!(e, Expr::Decrypt { record: 0 });
        assert_eq!(crypto::open(&master, &records[0]).unwrap(), "top secret\0");
        assert!(!records[0].ciphertext.windows(3).any(|w| w == b"top"));
    }

    #[test]
    fn test_equal_strings_get_distinct_records() {
        let master = [3u8; 32];
        let mut records = Vec::new();
        let mut rng = StdRng::seed_from_u64(11);
        encrypt_literal(&mut records, &master, "dup", &mut rng).unwrap();
        encrypt_literal(&mut records, &master, "dup", &mut rng).unwrap();
        assert_ne!(records[0].ciphertext, records[1].ciphertext);
    }
}
