// Copyright (c) 2024 The Warden Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Conversion between parameter lists and their flat string form, as consumed
//! by kernel and hypervisor command lines.

pub use warden_types::config::hypervisor::Param;

const KV_DELIMITER: &str = "=";

/// Convert a parameter list to flat strings, joining key and value with
/// `delim`.
///
/// A pair with both fields empty is dropped; a pair with one empty field is
/// emitted as the other field alone; with an empty `delim`, key and value
/// become two consecutive tokens. Keys and values must not themselves contain
/// `delim`, no escaping is performed.
pub fn serialize_params(params: &[Param], delim: &str) -> Vec<String> {
    let mut parameters = Vec::new();

    for p in params {
        if p.key.is_empty() && p.value.is_empty() {
            continue;
        } else if p.key.is_empty() {
            parameters.push(p.value.clone());
        } else if p.value.is_empty() {
            parameters.push(p.key.clone());
        } else if delim.is_empty() {
            parameters.push(p.key.clone());
            parameters.push(p.value.clone());
        } else {
            parameters.push(format!("{}{}{}", p.key, delim, p.value));
        }
    }

    parameters
}

/// Convert flat strings back to a parameter list, splitting each token on the
/// first `=`.
///
/// A token without `=` becomes a key with an empty value; empty tokens are
/// skipped. Note serialize followed by deserialize is not an exact inverse
/// when values themselves contain `=`.
pub fn deserialize_params(parameters: &[String]) -> Vec<Param> {
    let mut params = Vec::new();

    for parameter in parameters {
        if parameter.is_empty() {
            continue;
        }

        match parameter.split_once(KV_DELIMITER) {
            Some((key, value)) => params.push(Param::new(key, value)),
            None => params.push(Param::new(parameter, "")),
        }
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_params() {
        #[derive(Debug)]
        struct TestData<'a> {
            params: Vec<Param>,
            delim: &'a str,
            expected: Vec<&'a str>,
        }

        let tests = &[
            TestData {
                params: vec![Param::new("foo", "bar")],
                delim: "=",
                expected: vec!["foo=bar"],
            },
            // an empty delimiter splits key and value into two tokens
            TestData {
                params: vec![Param::new("foo", "bar")],
                delim: "",
                expected: vec!["foo", "bar"],
            },
            // one-sided pairs collapse to a single token
            TestData {
                params: vec![Param::new("foo", ""), Param::new("", "bar")],
                delim: "=",
                expected: vec!["foo", "bar"],
            },
            // fully empty pairs are dropped
            TestData {
                params: vec![
                    Param::new("", ""),
                    Param::new("reboot", "k"),
                    Param::new("", ""),
                ],
                delim: "=",
                expected: vec!["reboot=k"],
            },
        ];

        for (i, t) in tests.iter().enumerate() {
            let msg = format!("test[{}]: {:?}", i, t);
            let result = serialize_params(&t.params, t.delim);
            assert_eq!(result, t.expected, "{}", msg);
        }
    }

    #[test]
    fn test_deserialize_params() {
        let strings = vec![
            "console=ttyS0".to_string(),
            "nokaslr".to_string(),
            "".to_string(),
            "root=/dev/vda1".to_string(),
        ];

        let params = deserialize_params(&strings);
        assert_eq!(
            params,
            vec![
                Param::new("console", "ttyS0"),
                Param::new("nokaslr", ""),
                Param::new("root", "/dev/vda1"),
            ]
        );
    }

    #[test]
    fn test_params_round_trip() {
        let params = vec![
            Param::new("reboot", "k"),
            Param::new("panic", "1"),
            Param::new("nomodule", ""),
            Param::new("console", "ttyS0"),
        ];

        let strings = serialize_params(&params, "=");
        assert_eq!(deserialize_params(&strings), params);
    }

    #[test]
    fn test_params_round_trip_value_with_delimiter() {
        // Splitting on the first '=' keeps later ones inside the value...
        let params = vec![Param::new("rootflags", "data=ordered")];

        let strings = serialize_params(&params, "=");
        assert_eq!(strings, vec!["rootflags=data=ordered"]);
        assert_eq!(deserialize_params(&strings), params);

        // ...but a value-only pair whose value contains '=' comes back as a
        // key/value pair: the round trip is not an exact inverse.
        let params = vec![Param::new("", "data=ordered")];

        let strings = serialize_params(&params, "=");
        assert_eq!(strings, vec!["data=ordered"]);
        assert_eq!(
            deserialize_params(&strings),
            vec![Param::new("data", "ordered")]
        );
    }
}
