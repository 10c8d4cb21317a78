use crate::{Annotation, Arg, Document, Interface, Method, Property, Signal};
use quick_xml::events::{BytesStart, BytesText, Event as XEvent};
use quick_xml::reader::Reader;

type Rdr<'x> = Reader<&'x [u8]>;

/// Deepest annotation nesting [`parse`] accepts. An annotation directly
/// under an interface, method, signal, property or arg is at depth 0.
pub const DEFAULT_MAX_ANNOTATION_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("document is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("{pos}: <{element}> is missing the `{attr}` attribute")]
    MissingAttr {
        pos: usize,
        element: &'static str,
        attr: &'static str,
    },
    #[error("{pos}: {element}: expected {expected}, got {got}")]
    Unexpected {
        pos: usize,
        element: &'static str,
        expected: &'static str,
        got: String,
    },
    #[error("{pos}: {msg}")]
    Invalid { pos: usize, msg: String },
    #[error("{pos}: annotations nest deeper than {max} levels")]
    AnnotationDepth { pos: usize, max: usize },
    #[error("unexpected end of document inside {0}")]
    Eof(&'static str),
}

impl ParseError {
    fn new(rdr: &Rdr<'_>, element: &'static str, expected: &'static str, got: &XEvent<'_>) -> ParseError {
        let got = match got {
            XEvent::Start(e) => format!("<{}>", String::from_utf8_lossy(e.name().as_ref())),
            XEvent::End(e) => format!("</{}>", String::from_utf8_lossy(e.name().as_ref())),
            XEvent::Text(_) => String::from("text"),
            XEvent::CData(_) => String::from("CDATA"),
            evt => format!("{evt:?}"),
        };
        ParseError::Unexpected {
            pos: rdr.buffer_position(),
            element,
            expected,
            got,
        }
    }

    fn invalid(rdr: &Rdr<'_>, msg: String) -> ParseError {
        ParseError::Invalid {
            pos: rdr.buffer_position(),
            msg,
        }
    }
}

fn find_attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, ParseError> {
    match e.try_get_attribute(name).map_err(quick_xml::Error::from)? {
        Some(a) => Ok(Some(a.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

fn get_attr(
    rdr: &Rdr<'_>,
    e: &BytesStart<'_>,
    element: &'static str,
    attr: &'static str,
) -> Result<String, ParseError> {
    find_attr(e, attr)?.ok_or(ParseError::MissingAttr {
        pos: rdr.buffer_position(),
        element,
        attr,
    })
}

fn is_blank(txt: &BytesText<'_>) -> bool {
    txt.iter().all(|b| b.is_ascii_whitespace())
}

/// Consumes everything up to and including the end tag matching `start`.
fn skip(rdr: &mut Rdr<'_>, start: &BytesStart<'_>) -> Result<(), ParseError> {
    tracing::debug!(
        element = %String::from_utf8_lossy(start.name().as_ref()),
        pos = rdr.buffer_position(),
        "skipping element"
    );
    rdr.read_to_end(start.name())?;
    Ok(())
}

/// Feeds each child element of the current element to `child` until the
/// closing tag. End tag names are checked by the reader itself.
fn read_children<'x>(
    rdr: &mut Rdr<'x>,
    element: &'static str,
    mut child: impl FnMut(&mut Rdr<'x>, BytesStart<'x>) -> Result<(), ParseError>,
) -> Result<(), ParseError> {
    loop {
        match rdr.read_event()? {
            XEvent::Start(start) => child(rdr, start)?,
            XEvent::End(_) => return Ok(()),
            XEvent::Comment(_) | XEvent::PI(_) => {}
            XEvent::Text(txt) if is_blank(&txt) => {}
            XEvent::Eof => return Err(ParseError::Eof(element)),
            evt => return Err(ParseError::new(rdr, element, "an element", &evt)),
        }
    }
}

/// Parses a D-Bus introspection document.
///
/// Only the interfaces of the root `<node>` are kept; child nodes and
/// unknown elements are skipped along with everything inside them.
pub fn parse(xml: &[u8]) -> Result<Document, ParseError> {
    parse_bounded(xml, DEFAULT_MAX_ANNOTATION_DEPTH)
}

/// Like [`parse`], but fails with [`ParseError::AnnotationDepth`] once
/// annotations nest deeper than `max_annotation_depth`.
#[tracing::instrument(skip_all, fields(len = xml.len(), max = max_annotation_depth))]
pub fn parse_bounded(xml: &[u8], max_annotation_depth: usize) -> Result<Document, ParseError> {
    let xml = std::str::from_utf8(xml)?;
    let mut rdr = Reader::from_str(xml);
    rdr.trim_text(false);
    rdr.expand_empty_elements(true);

    let mut doc = None;
    loop {
        match rdr.read_event()? {
            XEvent::Decl(_) | XEvent::DocType(_) | XEvent::PI(_) | XEvent::Comment(_) => {}
            XEvent::Text(txt) if is_blank(&txt) => {}
            XEvent::Start(start) if doc.is_none() && start.name().as_ref() == b"node" => {
                doc = Some(read_node(&mut rdr, max_annotation_depth)?);
            }
            XEvent::Eof => return doc.ok_or(ParseError::Eof("document")),
            evt if doc.is_none() => return Err(ParseError::new(&rdr, "document", "<node>", &evt)),
            evt => return Err(ParseError::new(&rdr, "document", "end of document", &evt)),
        }
    }
}

fn read_node(rdr: &mut Rdr<'_>, max: usize) -> Result<Document, ParseError> {
    let mut interfaces = vec![];
    read_children(rdr, "<node>", |rdr, start| {
        match start.name().as_ref() {
            b"interface" => {
                let iname = get_attr(rdr, &start, "interface", "name")?;
                interfaces.push(read_interface(rdr, iname, max)?);
            }
            _ => skip(rdr, &start)?,
        }
        Ok(())
    })?;
    Ok(Document { interfaces })
}

fn read_interface(rdr: &mut Rdr<'_>, name: String, max: usize) -> Result<Interface, ParseError> {
    let mut methods = vec![];
    let mut signals = vec![];
    let mut properties = vec![];
    let mut annotations = vec![];
    read_children(rdr, "<interface>", |rdr, start| {
        match start.name().as_ref() {
            b"method" => {
                let mname = get_attr(rdr, &start, "method", "name")?;
                methods.push(read_method(rdr, mname, max)?);
            }
            b"signal" => {
                let sname = get_attr(rdr, &start, "signal", "name")?;
                signals.push(read_signal(rdr, sname, max)?);
            }
            b"property" => properties.push(read_property(rdr, &start, max)?),
            b"annotation" => annotations.push(read_annotation(rdr, &start, 0, max)?),
            _ => skip(rdr, &start)?,
        }
        Ok(())
    })?;
    tracing::trace!(
        interface = %name,
        methods = methods.len(),
        signals = signals.len(),
        properties = properties.len(),
        "read interface"
    );
    Ok(Interface {
        name,
        methods,
        signals,
        properties,
        annotations,
    })
}

fn read_method(rdr: &mut Rdr<'_>, name: String, max: usize) -> Result<Method, ParseError> {
    let mut in_args = vec![];
    let mut out_args = vec![];
    let mut annotations = vec![];
    read_children(rdr, "<method>", |rdr, start| {
        match start.name().as_ref() {
            b"arg" => match find_attr(&start, "direction")?.as_deref() {
                None | Some("in") => in_args.push(read_arg(rdr, &start, max)?),
                Some("out") => out_args.push(read_arg(rdr, &start, max)?),
                Some(dir) => {
                    return Err(ParseError::invalid(
                        rdr,
                        format!("method {name}: unknown arg direction {dir:?}"),
                    ))
                }
            },
            b"annotation" => annotations.push(read_annotation(rdr, &start, 0, max)?),
            _ => skip(rdr, &start)?,
        }
        Ok(())
    })?;
    Ok(Method {
        name,
        in_args,
        out_args,
        annotations,
    })
}

fn read_signal(rdr: &mut Rdr<'_>, name: String, max: usize) -> Result<Signal, ParseError> {
    let mut args = vec![];
    let mut annotations = vec![];
    read_children(rdr, "<signal>", |rdr, start| {
        match start.name().as_ref() {
            b"arg" => match find_attr(&start, "direction")?.as_deref() {
                None | Some("out") => args.push(read_arg(rdr, &start, max)?),
                Some(dir) => {
                    return Err(ParseError::invalid(
                        rdr,
                        format!("signal {name}: arg direction must be \"out\", got {dir:?}"),
                    ))
                }
            },
            b"annotation" => annotations.push(read_annotation(rdr, &start, 0, max)?),
            _ => skip(rdr, &start)?,
        }
        Ok(())
    })?;
    Ok(Signal {
        name,
        args,
        annotations,
    })
}

fn read_property(rdr: &mut Rdr<'_>, start: &BytesStart<'_>, max: usize) -> Result<Property, ParseError> {
    let name = get_attr(rdr, start, "property", "name")?;
    let signature = get_attr(rdr, start, "property", "type")?;
    let access = get_attr(rdr, start, "property", "access")?;
    let (readable, writable) = match access.as_str() {
        "read" => (true, false),
        "write" => (false, true),
        "readwrite" => (true, true),
        _ => {
            return Err(ParseError::invalid(
                rdr,
                format!("property {name}: unknown access {access:?}"),
            ))
        }
    };
    let annotations = read_annotations(rdr, "<property>", 0, max)?;
    Ok(Property {
        name,
        signature,
        readable,
        writable,
        annotations,
    })
}

fn read_arg(rdr: &mut Rdr<'_>, start: &BytesStart<'_>, max: usize) -> Result<Arg, ParseError> {
    let name = find_attr(start, "name")?;
    let signature = get_attr(rdr, start, "arg", "type")?;
    let annotations = read_annotations(rdr, "<arg>", 0, max)?;
    Ok(Arg {
        name,
        signature,
        annotations,
    })
}

/// Reads an annotation found at nesting `depth`; past `max` the document
/// is rejected before recursing any further.
fn read_annotation(
    rdr: &mut Rdr<'_>,
    start: &BytesStart<'_>,
    depth: usize,
    max: usize,
) -> Result<Annotation, ParseError> {
    if depth > max {
        return Err(ParseError::AnnotationDepth {
            pos: rdr.buffer_position(),
            max,
        });
    }
    let key = get_attr(rdr, start, "annotation", "name")?;
    let value = get_attr(rdr, start, "annotation", "value")?;
    let annotations = read_annotations(rdr, "<annotation>", depth + 1, max)?;
    Ok(Annotation {
        key,
        value,
        annotations,
    })
}

/// Children of elements that may only carry annotations.
fn read_annotations(
    rdr: &mut Rdr<'_>,
    element: &'static str,
    depth: usize,
    max: usize,
) -> Result<Vec<Annotation>, ParseError> {
    let mut annotations = vec![];
    read_children(rdr, element, |rdr, start| {
        match start.name().as_ref() {
            b"annotation" => annotations.push(read_annotation(rdr, &start, depth, max)?),
            _ => skip(rdr, &start)?,
        }
        Ok(())
    })?;
    Ok(annotations)
}
