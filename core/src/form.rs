//! `application/x-www-form-urlencoded` codec over ordered field lists.

use url::form_urlencoded;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

pub fn encode_fields(fields: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

pub fn decode_fields(input: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(input.as_bytes()).into_owned().collect()
}
