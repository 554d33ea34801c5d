//! Payload template filling.
//!
//! Scans the serialized payload for `{{ … }}` placeholders and substitutes
//! them from the edge object's config map. The scan restarts from the top
//! after every substitution, so values that themselves contain placeholders
//! are resolved too. Unknown keys resolve to the empty string.

use serde_json::Value;

use crate::dom;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template: begin found but end not found")]
    Unterminated,
    #[error("template: payload is not utf-8")]
    NotUtf8,
}

pub fn fill(payload: &[u8], config: &Value) -> Result<Vec<u8>, TemplateError> {
    let mut data =
        String::from_utf8(payload.to_vec()).map_err(|_| TemplateError::NotUtf8)?;

    loop {
        let Some(begin) = data.find("{{") else {
            return Ok(data.into_bytes());
        };
        let Some(offset) = data[begin..].find("}}") else {
            return Err(TemplateError::Unterminated);
        };
        let end = begin + offset + 2;

        let key = data[begin..end]
            .trim_matches(|c| c == ' ' || c == '{' || c == '}')
            .replace("object.config.", "");
        let value = dom::get_str(config, &key).unwrap_or_default().to_string();

        data.replace_range(begin..end, &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_placeholders_is_identity() {
        let cfg = json!({});
        let payload = br#"{"jsonrpc":"2.0","method":"m","params":{}}"#;
        assert_eq!(fill(payload, &cfg).unwrap(), payload.to_vec());
    }

    #[test]
    fn resolves_dotted_key() {
        let cfg = json!({"devs": {"d1": "00:11:22:33:44:55"}});
        let payload = br#"{"device":"{{object.config.devs.d1}}"}"#;
        assert_eq!(
            fill(payload, &cfg).unwrap(),
            br#"{"device":"00:11:22:33:44:55"}"#.to_vec()
        );
    }

    #[test]
    fn tolerates_inner_whitespace() {
        let cfg = json!({"a": "x"});
        assert_eq!(fill(br#"{{ a }}"#, &cfg).unwrap(), b"x".to_vec());
    }

    #[test]
    fn missing_key_becomes_empty() {
        let cfg = json!({});
        assert_eq!(
            fill(br#""{{object.config.missing}}""#, &cfg).unwrap(),
            br#""""#.to_vec()
        );
    }

    #[test]
    fn idempotent() {
        let cfg = json!({"a": "val"});
        let once = fill(br#"{"x":"{{a}}"}"#, &cfg).unwrap();
        let twice = fill(&once, &cfg).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn multiple_placeholders() {
        let cfg = json!({"a": "1", "b": "2"});
        assert_eq!(fill(b"{{a}}-{{b}}-{{a}}", &cfg).unwrap(), b"1-2-1".to_vec());
    }

    #[test]
    fn unterminated_errors() {
        let cfg = json!({});
        assert!(matches!(
            fill(b"{\"x\":\"{{oops\"}", &cfg),
            Err(TemplateError::Unterminated)
        ));
    }
}
