//! Minimal header block parsing used by the handshake checks.
//!
//! The request headers are rendered back into a raw `Name: value` block with canonical
//! header names (`Sec-Websocket-Version`) and split into a [`HeaderTokens`] map. The
//! parser only keeps lines with exactly one colon, so values that contain a colon
//! themselves (`Origin: http://...`) never make it into the map. Checks that need those
//! values read the [`HeaderMap`] directly instead.

use std::collections::HashMap;

use hyper::header::HeaderMap;

/// Canonical names used to query a [`HeaderTokens`] map.
pub(crate) mod names {
    pub const CONNECTION: &str = "Connection";
    pub const UPGRADE: &str = "Upgrade";
    pub const SEC_WEBSOCKET_VERSION: &str = "Sec-Websocket-Version";
    pub const SEC_WEBSOCKET_EXTENSIONS: &str = "Sec-Websocket-Extensions";
}

/// Mapping from header name to the values found for it, in the order they appeared.
///
/// Keys are compared verbatim: no case folding is applied when parsing or looking up.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderTokens {
    inner: HashMap<String, Vec<String>>,
}

impl HeaderTokens {
    /// Parses a raw header block, one header per `\r\n` terminated line.
    ///
    /// Names and values are trimmed of surrounding spaces. Lines that do not contain
    /// exactly one `:` are dropped.
    pub fn parse(block: &str) -> Self {
        let mut inner: HashMap<String, Vec<String>> = HashMap::with_capacity(10);

        for line in block.split("\r\n") {
            let mut words = line.split(':');
            let (Some(key), Some(value), None) = (words.next(), words.next(), words.next()) else {
                continue;
            };

            inner
                .entry(key.trim_matches(' ').to_owned())
                .or_default()
                .push(value.trim_matches(' ').to_owned());
        }

        Self { inner }
    }

    /// Renders `headers` into a header block and parses it.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        Self::parse(&render_header_block(headers))
    }

    /// Values recorded for `name`, empty when the header is absent.
    pub fn get(&self, name: &str) -> &[String] {
        self.inner.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Iterates over every header name and its values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Reports whether any value of `name`, split on commas, holds `token`.
    ///
    /// Tokens are trimmed and compared ignoring ASCII case. Returns false when the
    /// header is absent.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get(name).iter().any(|value| {
            value
                .split(',')
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// Writes `headers` as `Name: value\r\n` lines using canonical header names.
///
/// Values that are not visible ASCII are skipped.
pub(crate) fn render_header_block(headers: &HeaderMap) -> String {
    let mut block = String::with_capacity(headers.len() * 32);

    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };

        block.push_str(&canonical_name(name.as_str()));
        block.push_str(": ");
        block.push_str(value);
        block.push_str("\r\n");
    }

    block
}

/// Uppercases the first letter and every letter following a `-`, lowercasing the rest.
pub(crate) fn canonical_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let c = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            c
        })
        .collect()
}
