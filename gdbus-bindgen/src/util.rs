use std::fmt::Write;

/// Lowercases ASCII letters and turns `.` into `_`.
///
/// Nothing else is touched, so a name containing other characters that are
/// not valid in a C identifier (e.g. `-`) passes through as is.
pub fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '.' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Quotes `s` as a C string literal.
pub(crate) fn c_str_literal(s: &str) -> String {
    let mut r = String::with_capacity(s.len() + 2);
    r.push('"');
    for c in s.chars() {
        match c {
            '"' => r.push_str("\\\""),
            '\\' => r.push_str("\\\\"),
            '\n' => r.push_str("\\n"),
            '\t' => r.push_str("\\t"),
            '\r' => r.push_str("\\r"),
            c if c.is_ascii_control() => {
                // three digits so a following digit isn't read as part of the escape
                let _ = write!(r, "\\{:03o}", c as u32);
            }
            c => r.push(c),
        }
    }
    r.push('"');
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_interface_name() {
        assert_eq!(normalize("com.Example.Foo"), "com_example_foo");
        assert_eq!(normalize("DoThing"), "dothing");
    }

    #[test]
    fn normalize_passes_other_characters_through() {
        assert_eq!(normalize("Foo-Bar"), "foo-bar");
        assert_eq!(normalize("Ünïcode.X"), "Ünïcode_x");
    }

    #[test]
    fn literal_escapes() {
        assert_eq!(c_str_literal("plain"), r#""plain""#);
        assert_eq!(c_str_literal(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(c_str_literal("x\ny"), r#""x\ny""#);
        assert_eq!(c_str_literal("\u{1}0"), r#""\0010""#);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in "\\PC*") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once.clone());
            prop_assert!(!once.contains('.'));
            prop_assert!(!once.chars().any(|c| c.is_ascii_uppercase()));
        }

        #[test]
        fn normalize_keeps_char_count(s in "[A-Za-z0-9._]{0,32}") {
            prop_assert_eq!(normalize(&s).chars().count(), s.chars().count());
        }
    }
}
