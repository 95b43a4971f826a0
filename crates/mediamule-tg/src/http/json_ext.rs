use super::HttpClientError;
use crate::prelude::*;
use crate::{err, Result};
use serde::de::DeserializeOwned;

pub(crate) fn parse_json<Res: DeserializeOwned>(bytes: &[u8]) -> Result<Res> {
    serde_json::from_slice(bytes).map_err(|err| {
        match std::str::from_utf8(bytes) {
            Ok(response_body) => warn!(
                response_body = response_body.truncate_chars(500),
                "Bad JSON response"
            ),
            Err(utf8_decode_err) => warn!(
                response_len = bytes.len(),
                ?utf8_decode_err,
                "Bad JSON response"
            ),
        };
        err!(HttpClientError::UnexpectedResponseJsonShape { source: err })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use assert_matches::assert_matches;

    #[test]
    fn json_shapes() {
        let value: Vec<u32> = parse_json(b"[1, 2]").unwrap();
        assert_eq!(value, [1, 2]);

        for body in [&b"{\"error\": \"loading\"}"[..], &[0xff, 0xfe]] {
            let err = parse_json::<Vec<u32>>(body).unwrap_err();
            assert_matches!(
                err.kind(),
                ErrorKind::HttpClient {
                    source: HttpClientError::UnexpectedResponseJsonShape { .. }
                }
            );
        }
    }
}
