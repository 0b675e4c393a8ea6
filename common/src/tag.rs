//! Helper macros for working with collections of [`KeyParam`]s.
//!
//! [`KeyParam`]: keystone_wire::types::KeyParam

/// Macro to retrieve the (single) value of a tag in a collection of
/// `KeyParam`s.  There can be only one.
#[macro_export]
macro_rules! get_tag_value {
    { $params:expr, $variant:ident, $err:expr } => {
        {
            let mut result = None;
            let mut count = 0;
            for param in $params {
                if let $crate::wire::types::KeyParam::$variant(v) = param {
                    count += 1;
                    result = Some(v.clone());
                }
            }
            match count {
                0 => Err($crate::ks_verr!($err, "missing tag {}", stringify!($variant))),
                1 => Ok(result.unwrap()),  /* safe: count=1 => exists */
                _ => Err($crate::ks_verr!($err, "duplicate tag {}", stringify!($variant))),
            }
        }
    }
}

/// Macro to retrieve the value of an optional single-valued tag in a
/// collection of `KeyParam`s.  It may or may not be present, but multiple
/// instances of the tag are assumed to be invalid.
#[macro_export]
macro_rules! get_opt_tag_value {
    { $params:expr, $variant:ident } => {
        get_opt_tag_value!($params, $variant, InvalidTag)
    };
    { $params:expr, $variant:ident, $dup_error:ident } => {
        {
            let mut result = None;
            let mut count = 0;
            for param in $params {
                if let $crate::wire::types::KeyParam::$variant(v) = param {
                    count += 1;
                    result = Some(v);
                }
            }
            match count {
                0 => Ok(None),
                1 => Ok(Some(result.unwrap())),  /* safe: count=1 => exists */
                _ => Err($crate::ks_err!($dup_error, "duplicate tag {}", stringify!($variant))),
            }
        }
    }
}

/// Macro to retrieve a `bool` tag value, returning `false` if the tag is
/// absent.
#[macro_export]
macro_rules! get_bool_tag_value {
    { $params:expr, $variant:ident } => {
        {
            let mut count = 0;
            for param in $params {
                if let $crate::wire::types::KeyParam::$variant = param {
                    count += 1;
                }
            }
            match count {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err($crate::ks_err!(InvalidTag, "duplicate tag {}", stringify!($variant))),
            }
        }
    }
}

/// Macro to check whether a collection of `KeyParam`s holds an entry
/// matching the given value.
#[macro_export]
macro_rules! contains_tag_value {
    { $params:expr, $variant:ident, $value:expr } => {
        {
            let mut found = false;
            for param in $params {
                if let $crate::wire::types::KeyParam::$variant(v) = param {
                    if *v == $value {
                        found = true;
                    }
                }
            }
            found
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Error;
    use alloc::vec;
    use alloc::vec::Vec;
    use keystone_wire::types::{Algorithm, ErrorCode, KeyParam};

    #[test]
    fn test_get_tag_value() {
        let params = vec![KeyParam::Algorithm(Algorithm::Hmac), KeyParam::MacLength(128)];
        let algo = get_tag_value!(&params, Algorithm, ErrorCode::UnsupportedAlgorithm).unwrap();
        assert_eq!(algo, Algorithm::Hmac);
        let result: Result<Vec<u8>, Error> =
            get_tag_value!(&params, ApplicationId, ErrorCode::InvalidTag);
        crate::expect_err!(result, "missing tag");
    }

    #[test]
    fn test_get_opt_tag_value() {
        let params = vec![KeyParam::OsPatchlevel(202101)];
        assert_eq!(get_opt_tag_value!(&params, OsPatchlevel).unwrap(), Some(&202101));
        assert_eq!(get_opt_tag_value!(&params, OsVersion).unwrap(), None);
        let dup = vec![KeyParam::OsPatchlevel(202101), KeyParam::OsPatchlevel(202102)];
        let result = get_opt_tag_value!(&dup, OsPatchlevel);
        crate::expect_err!(result, "duplicate tag");
    }

    #[test]
    fn test_get_bool_tag_value() {
        let params = vec![KeyParam::NoAuthRequired];
        assert!(get_bool_tag_value!(&params, NoAuthRequired).unwrap());
        assert!(!get_bool_tag_value!(&params, EarlyBootOnly).unwrap());
    }

    #[test]
    fn test_contains_tag_value() {
        let params = vec![KeyParam::UsageCountLimit(1), KeyParam::UserSecureId(4)];
        assert!(contains_tag_value!(&params, UsageCountLimit, 1));
        assert!(!contains_tag_value!(&params, UsageCountLimit, 2));
    }
}
