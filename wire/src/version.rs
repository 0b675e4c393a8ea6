//! Message-version negotiation.
//!
//! The wire message layout evolved alongside the service versions; a client
//! and server agree on the newest message version both sides understand.

use enumn::N;

use crate::try_from_n;

/// Versions of the key management interface that a context can implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(i32)]
pub enum KmVersion {
    Keymaster1 = 10,
    Keymaster11 = 11,
    Keymaster2 = 20,
    Keymaster3 = 30,
    Keymaster4 = 40,
    Keymaster41 = 41,
    KeyMint1 = 100,
    KeyMint2 = 200,
    KeyMint3 = 300,
}
try_from_n!(KmVersion);

/// Build date of this implementation, YYYYMMDD.
pub const KM_DATE: u32 = 20201219;

/// Build date from which KeyMint implementations speak message version 4.
const KM_DATE_MESSAGE_V4: u32 = 20210701;

/// Return the newest message version supported by an implementation of
/// `km_version` built on `km_date`.
pub fn message_version(km_version: KmVersion, km_date: u32) -> i32 {
    match km_version {
        KmVersion::Keymaster1 | KmVersion::Keymaster11 | KmVersion::Keymaster2 => 2,
        KmVersion::Keymaster3 | KmVersion::Keymaster4 | KmVersion::Keymaster41 => 3,
        KmVersion::KeyMint1 | KmVersion::KeyMint2 | KmVersion::KeyMint3 => {
            if km_date < KM_DATE_MESSAGE_V4 {
                3
            } else {
                4
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_version() {
        assert_eq!(message_version(KmVersion::Keymaster1, KM_DATE), 2);
        assert_eq!(message_version(KmVersion::Keymaster2, KM_DATE), 2);
        assert_eq!(message_version(KmVersion::Keymaster3, KM_DATE), 3);
        assert_eq!(message_version(KmVersion::Keymaster41, KM_DATE), 3);
        assert_eq!(message_version(KmVersion::KeyMint1, KM_DATE), 3);
        assert_eq!(message_version(KmVersion::KeyMint1, 20210701), 4);
        assert_eq!(message_version(KmVersion::KeyMint2, 20220101), 4);
    }
}
