use hyper::header::{self, HeaderMap};

/// Lists the subprotocols offered by the client in `Sec-WebSocket-Protocol`.
///
/// Every header value is split on commas and trimmed. Empty entries are left out.
pub fn client_subprotocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(','))
        .map(str::trim)
        .filter(|protocol| !protocol.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Picks the first protocol from `server` that the client also offered.
pub fn match_subprotocol<'a, C, S>(client: &[C], server: &'a [S]) -> Option<&'a str>
where
    C: AsRef<str>,
    S: AsRef<str>,
{
    server
        .iter()
        .map(|preferred| preferred.as_ref())
        .find(|preferred| client.iter().any(|offered| offered.as_ref() == *preferred))
}

/// Chooses the subprotocol announced in the handshake response.
///
/// When the server declares no preferences a `Sec-WebSocket-Protocol` value already set by
/// the caller is used as is, which lets callers negotiate on their own.
pub(crate) fn select(
    request: &HeaderMap,
    server: &[String],
    response_header: &HeaderMap,
) -> Option<String> {
    if server.is_empty() {
        return response_header
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|h| h.to_str().ok())
            .filter(|protocol| !protocol.is_empty())
            .map(str::to_owned);
    }

    let offered = client_subprotocols(request);
    match_subprotocol(&offered, server).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use hyper::header::HeaderValue;

    use super::*;

    fn offering(values: &[&'static str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for &value in values {
            headers.append(
                header::SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    #[test]
    fn test_client_subprotocols() {
        let headers = offering(&[" chat , superchat,", "v2.json"]);
        assert_eq!(client_subprotocols(&headers), ["chat", "superchat", "v2.json"]);
        assert!(client_subprotocols(&HeaderMap::new()).is_empty());
        assert!(client_subprotocols(&offering(&["  "])).is_empty());
    }

    #[test]
    fn test_match_prefers_server_order() {
        let client = ["b", "a", "c"];
        assert_eq!(match_subprotocol(&client, &["a", "b"]), Some("a"));
        assert_eq!(match_subprotocol(&client, &["z", "c", "b"]), Some("c"));
        assert_eq!(match_subprotocol(&client, &["z"]), None);
        assert_eq!(match_subprotocol::<&str, &str>(&[], &["a"]), None);
    }

    #[test]
    fn test_match_is_exact() {
        assert_eq!(match_subprotocol(&["Chat"], &["chat"]), None);
    }

    #[test]
    fn test_match_result_in_both_lists() {
        let server = ["mqtt", "wamp", "soap", "xmpp"];
        let clients: [&[&str]; 4] = [
            &["xmpp", "soap"],
            &["graphql-ws"],
            &[],
            &["wamp", "mqtt", "wamp"],
        ];

        for client in clients {
            match match_subprotocol(client, &server) {
                Some(selected) => {
                    assert!(client.contains(&selected));
                    let position = server.iter().position(|p| *p == selected).unwrap();
                    assert!(server[..position].iter().all(|p| !client.contains(p)));
                }
                None => assert!(client.iter().all(|p| !server.contains(p))),
            }
        }
    }

    #[test]
    fn test_select_without_preferences_uses_preset() {
        let request = offering(&["chat"]);
        let mut response_header = HeaderMap::new();
        assert_eq!(select(&request, &[], &response_header), None);

        response_header.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("custom"),
        );
        assert_eq!(
            select(&request, &[], &response_header).as_deref(),
            Some("custom")
        );
    }

    #[test]
    fn test_select_ignores_preset_with_preferences() {
        let request = offering(&["superchat, chat"]);
        let mut response_header = HeaderMap::new();
        response_header.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("custom"),
        );
        let server = vec!["chat".to_owned(), "superchat".to_owned()];
        assert_eq!(
            select(&request, &server, &response_header).as_deref(),
            Some("chat")
        );
        assert_eq!(select(&offering(&["other"]), &server, &response_header), None);
    }
}
