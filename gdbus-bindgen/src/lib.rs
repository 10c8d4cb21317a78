mod parse;
pub use parse::{parse, parse_bounded, ParseError, DEFAULT_MAX_ANNOTATION_DEPTH};
mod generate;
pub use generate::{
    generate, Collision, DeclKind, Declaration, GenOptions, GenerateError, InterfaceBlock, Output,
};
mod util;
pub use util::normalize;

/// Interfaces of the root `<node>` of an introspection document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub methods: Vec<Method>,
    pub signals: Vec<Signal>,
    pub properties: Vec<Property>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub in_args: Vec<Arg>,
    pub out_args: Vec<Arg>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signal {
    pub name: String,
    pub args: Vec<Arg>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub signature: String,
    pub readable: bool,
    pub writable: bool,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arg {
    /// `None` for an `<arg>` without a `name` attribute.
    pub name: Option<String>,
    pub signature: String,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub key: String,
    pub value: String,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

/// Parses an introspection document and renders its static declarations.
///
/// `options.max_annotation_depth` bounds annotation nesting while parsing
/// as well as while generating.
pub fn gen_bindings(xml: &[u8], options: &GenOptions) -> Result<Output, Error> {
    let doc = parse_bounded(xml, options.max_annotation_depth)?;
    Ok(generate(&doc, options)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_bindings_reports_stage() {
        let xml = br#"<node><interface name="org.Example.Thing"><method name="Ping"/></interface></node>"#;
        let out = gen_bindings(xml, &GenOptions::default()).unwrap();
        assert!(out
            .to_string()
            .contains("_org_example_thing_method_ping"));

        let err = gen_bindings(b"<node>", &GenOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "{err}");

        let xml = br#"<node><interface name="a.B"/><interface name="a.b"/></node>"#;
        let err = gen_bindings(xml, &GenOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Generate(_)), "{err}");
    }

    #[test]
    fn gen_bindings_bounds_parse_depth() {
        let xml = br#"<node><interface name="a.B">
            <annotation name="x" value="1"><annotation name="y" value="2"/></annotation>
        </interface></node>"#;
        let options = GenOptions {
            max_annotation_depth: 0,
            ..GenOptions::default()
        };
        let err = gen_bindings(xml, &options).unwrap_err();
        assert!(
            matches!(err, Error::Parse(ParseError::AnnotationDepth { max: 0, .. })),
            "{err}"
        );

        let options = GenOptions {
            max_annotation_depth: 1,
            ..GenOptions::default()
        };
        assert!(gen_bindings(xml, &options).is_ok());
    }
}
