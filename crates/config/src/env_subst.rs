/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders in config text.
///
/// Unresolvable variables without a fallback are left as-is so the parse
/// error (or the literal value) points at the missing variable.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder literally.
            result.push_str(&rest[start..]);
            return result;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) if !value.is_empty() || fallback.is_none() => {
                result.push_str(&value)
            },
            (false, _, Some(fallback)) => result.push_str(fallback),
            _ => {
                result.push_str("${");
                result.push_str(body);
                result.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn lookup(name: &str) -> Option<String> {
        match name {
            "GATELINK_TOKEN" => Some("tok".into()),
            "GATELINK_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[rstest]
    #[case("token = \"${GATELINK_TOKEN}\"", "token = \"tok\"")]
    #[case("${GATELINK_MISSING}", "${GATELINK_MISSING}")]
    #[case("${GATELINK_MISSING:-4}", "4")]
    #[case("${GATELINK_TOKEN:-other}", "tok")]
    #[case("${GATELINK_EMPTY:-fallback}", "fallback")]
    #[case("${GATELINK_EMPTY}", "")]
    #[case("plain text", "plain text")]
    #[case("a ${GATELINK_TOKEN} b ${GATELINK_TOKEN}", "a tok b tok")]
    #[case("${}", "${}")]
    #[case("tail ${GATELINK_TOKEN", "tail ${GATELINK_TOKEN")]
    fn substitution(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(substitute_with(input, lookup), expected);
    }

    #[test]
    #[allow(unsafe_code)]
    fn reads_process_environment() {
        unsafe { std::env::set_var("GATELINK_SUBST_TEST_VAR", "hello") };
        assert_eq!(substitute_env("key=${GATELINK_SUBST_TEST_VAR}"), "key=hello");
        unsafe { std::env::remove_var("GATELINK_SUBST_TEST_VAR") };
    }
}
