use crate::parse::DEFAULT_MAX_ANNOTATION_DEPTH;
use crate::util::{c_str_literal, normalize};
use crate::{Annotation, Arg, Document, Interface, Method, Property, Signal};
use std::collections::HashSet;
use std::fmt::{self, Write};

macro_rules! emitln {
    ($dst:expr, $($t:tt)*) => {{
        // writing into a String never fails
        let _ = writeln!($dst, $($t)*);
    }};
}

const NULL: &str = "NULL";
const PREAMBLE: &str = "#include <glib.h>\n#include <gio/gio.h>\n";
const BEGIN: &str = "/* Introspection data begins */";
const END: &str = "/* Introspection data ends */";

/// What to do when two nodes end up with the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collision {
    /// Fail the pass.
    #[default]
    Error,
    /// Append `_2`, `_3`, ... until the identifier is free.
    Suffix,
}

#[derive(Debug, Clone)]
pub struct GenOptions {
    /// Prepended to every generated identifier.
    pub prefix: String,
    /// One level of indentation inside initializers.
    pub indent: String,
    /// When false every annotation reference is `NULL` and no annotation
    /// declarations are emitted.
    pub emit_annotations: bool,
    /// Deepest annotation nesting allowed; an annotation directly under its
    /// owner is at depth 0. Deeper trees fail with
    /// [`GenerateError::AnnotationDepth`].
    pub max_annotation_depth: usize,
    pub on_collision: Collision,
}

impl Default for GenOptions {
    fn default() -> Self {
        GenOptions {
            prefix: String::from("_"),
            indent: String::from("\t"),
            emit_annotations: true,
            max_annotation_depth: DEFAULT_MAX_ANNOTATION_DEPTH,
            on_collision: Collision::Error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("identifier `{ident}` generated twice ({kind:?})")]
    DuplicateIdentifier { ident: String, kind: DeclKind },
    #[error("annotations under `{scope}` nest deeper than {max} levels")]
    AnnotationDepth { scope: String, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Annotation,
    AnnotationPointers,
    Arg,
    ArgPointers,
    Method,
    MethodPointers,
    Signal,
    SignalPointers,
    Property,
    PropertyPointers,
    Interface,
    Accessor,
}

impl DeclKind {
    fn info_type(self) -> &'static str {
        use DeclKind::*;
        match self {
            Annotation | AnnotationPointers => "GDBusAnnotationInfo",
            Arg | ArgPointers => "GDBusArgInfo",
            Method | MethodPointers => "GDBusMethodInfo",
            Signal | SignalPointers => "GDBusSignalInfo",
            Property | PropertyPointers => "GDBusPropertyInfo",
            Interface | Accessor => "GDBusInterfaceInfo",
        }
    }

    fn pointers_comment(self) -> &'static str {
        use DeclKind::*;
        match self {
            AnnotationPointers => "Array with annotation pointers",
            ArgPointers => "Array with argument pointers",
            MethodPointers => "Array with method pointers",
            SignalPointers => "Array with signal pointers",
            PropertyPointers => "Array with property pointers",
            _ => unreachable!("{self:?} is not a pointer array"),
        }
    }
}

/// One generated definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub ident: String,
    pub kind: DeclKind,
    /// Identifiers this declaration refers to; all of them are declared
    /// before it.
    pub refs: Vec<String>,
    /// Section headers printed before this declaration, outermost first.
    pub sections: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBlock {
    pub name: String,
    pub decls: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub interfaces: Vec<InterfaceBlock>,
}

impl Output {
    /// All declarations in emission order.
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.interfaces.iter().flat_map(|b| b.decls.iter())
    }
}

impl fmt::Display for InterfaceBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "/* Interface {} */", self.name)?;
        writeln!(f)?;
        for d in &self.decls {
            for section in &d.sections {
                writeln!(f, "// {section}")?;
                writeln!(f)?;
            }
            f.write_str(&d.text)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PREAMBLE)?;
        writeln!(f)?;
        writeln!(f, "{BEGIN}")?;
        writeln!(f)?;
        for block in &self.interfaces {
            write!(f, "{block}")?;
        }
        writeln!(f, "{END}")
    }
}

#[derive(Clone, Copy)]
enum Role {
    In,
    Out,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::In => "in",
            Role::Out => "out",
        })
    }
}

fn or_null(r: &Option<String>) -> &str {
    r.as_deref().unwrap_or(NULL)
}

fn property_flags(readable: bool, writable: bool) -> &'static str {
    match (readable, writable) {
        (true, true) => "G_DBUS_PROPERTY_INFO_FLAGS_READABLE | G_DBUS_PROPERTY_INFO_FLAGS_WRITABLE",
        (true, false) => "G_DBUS_PROPERTY_INFO_FLAGS_READABLE",
        (false, true) => "G_DBUS_PROPERTY_INFO_FLAGS_WRITABLE",
        (false, false) => "G_DBUS_PROPERTY_INFO_FLAGS_NONE",
    }
}

/// Reserves `ident` in `taken`, resolving a clash per `policy`.
fn unique(
    taken: &mut HashSet<String>,
    ident: String,
    kind: DeclKind,
    policy: Collision,
) -> Result<String, GenerateError> {
    if !taken.contains(&ident) {
        taken.insert(ident.clone());
        return Ok(ident);
    }
    match policy {
        Collision::Error => Err(GenerateError::DuplicateIdentifier { ident, kind }),
        Collision::Suffix => {
            let mut n = 2usize;
            loop {
                let candidate = format!("{ident}_{n}");
                if taken.insert(candidate.clone()) {
                    tracing::warn!(%ident, renamed = %candidate, "identifier collision");
                    return Ok(candidate);
                }
                n += 1;
            }
        }
    }
}

/// State of one generation pass.
struct Generator<'g> {
    opts: &'g GenOptions,
    idents: HashSet<String>,
    scopes: HashSet<String>,
    decls: Vec<Declaration>,
}

impl<'g> Generator<'g> {
    fn new(opts: &'g GenOptions) -> Generator<'g> {
        Generator {
            opts,
            idents: HashSet::new(),
            scopes: HashSet::new(),
            decls: vec![],
        }
    }

    fn claim(&mut self, ident: String, kind: DeclKind) -> Result<String, GenerateError> {
        unique(&mut self.idents, ident, kind, self.opts.on_collision)
    }

    fn push(&mut self, ident: &str, kind: DeclKind, refs: Vec<String>, text: String) {
        tracing::trace!(ident, ?kind, "declaration");
        self.decls.push(Declaration {
            ident: ident.to_string(),
            kind,
            refs,
            sections: vec![],
            text,
        });
    }

    /// Heads the declarations emitted since `start` with `header`.
    fn open_section(&mut self, start: usize, header: String) {
        if let Some(first) = self.decls.get_mut(start) {
            first.sections.insert(0, header);
        }
    }

    fn render_struct(&self, comment: &str, kind: DeclKind, ident: &str, fields: &[&str]) -> String {
        let indent = &self.opts.indent;
        let mut s = String::new();
        emitln!(s, "// {comment}");
        emitln!(s, "static {} {ident} =", kind.info_type());
        emitln!(s, "{{");
        emitln!(s, "{indent}-1,");
        for (i, field) in fields.iter().enumerate() {
            let sep = if i + 1 < fields.len() { "," } else { "" };
            emitln!(s, "{indent}{field}{sep}");
        }
        emitln!(s, "}};");
        s
    }

    /// Emits the pointer array over `idents`, or nothing when there are none.
    fn gen_pointers(
        &mut self,
        kind: DeclKind,
        name: String,
        idents: Vec<String>,
    ) -> Result<Option<String>, GenerateError> {
        if idents.is_empty() {
            return Ok(None);
        }
        let ident = self.claim(name, kind)?;
        let indent = &self.opts.indent;
        let mut s = String::new();
        emitln!(s, "// {}", kind.pointers_comment());
        emitln!(s, "static {} * {ident}[] =", kind.info_type());
        emitln!(s, "{{");
        for r in &idents {
            emitln!(s, "{indent}&{r},");
        }
        emitln!(s, "{indent}{NULL}");
        emitln!(s, "}};");
        self.push(&ident, kind, idents, s);
        Ok(Some(ident))
    }

    fn gen_annotations(
        &mut self,
        annotations: &[Annotation],
        scope: &str,
        depth: usize,
    ) -> Result<Option<String>, GenerateError> {
        if !self.opts.emit_annotations || annotations.is_empty() {
            return Ok(None);
        }
        if depth > self.opts.max_annotation_depth {
            return Err(GenerateError::AnnotationDepth {
                scope: scope.to_string(),
                max: self.opts.max_annotation_depth,
            });
        }
        let start = self.decls.len();
        let mut idents = Vec::with_capacity(annotations.len());
        for (i, a) in annotations.iter().enumerate() {
            idents.push(self.gen_annotation(a, scope, i, depth)?);
        }
        self.open_section(start, format!("Annotations for {scope}"));
        self.gen_pointers(
            DeclKind::AnnotationPointers,
            format!("{scope}_annotation_pointers"),
            idents,
        )
    }

    /// Emits annotation `index` of `scope` after its own nested annotations.
    ///
    /// Nested annotations are scoped under the parent's full identifier plus
    /// its normalized key (`<parent>_<key>_annotation_<n>`), not under the
    /// bare key, so two parents sharing a key never produce the same names.
    fn gen_annotation(
        &mut self,
        a: &Annotation,
        scope: &str,
        index: usize,
        depth: usize,
    ) -> Result<String, GenerateError> {
        let ident = self.claim(format!("{scope}_annotation_{index}"), DeclKind::Annotation)?;
        let nested_scope = format!("{ident}_{}", normalize(&a.key));
        let nested = self.gen_annotations(&a.annotations, &nested_scope, depth + 1)?;
        let text = self.render_struct(
            &format!("Annotation {index}"),
            DeclKind::Annotation,
            &ident,
            &[&c_str_literal(&a.key), &c_str_literal(&a.value), or_null(&nested)],
        );
        self.push(&ident, DeclKind::Annotation, nested.into_iter().collect(), text);
        Ok(ident)
    }

    fn gen_args(
        &mut self,
        args: &[Arg],
        function: &str,
        role: Role,
    ) -> Result<Option<String>, GenerateError> {
        let start = self.decls.len();
        let mut idents = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            idents.push(self.gen_arg(arg, i, function, role)?);
        }
        self.open_section(start, format!("Arguments {function} for {role}"));
        self.gen_pointers(
            DeclKind::ArgPointers,
            format!("{function}_arg_{role}_pointers"),
            idents,
        )
    }

    fn gen_arg(
        &mut self,
        arg: &Arg,
        index: usize,
        function: &str,
        role: Role,
    ) -> Result<String, GenerateError> {
        let fragment = match &arg.name {
            Some(name) => normalize(name),
            None => format!("arg_{index}"),
        };
        let ident = self.claim(format!("{function}_arg_{fragment}_{role}"), DeclKind::Arg)?;
        let annotations = self.gen_annotations(&arg.annotations, &ident, 0)?;
        let name = arg.name.as_deref().map(c_str_literal);
        let text = self.render_struct(
            &format!("Argument {}", arg.name.as_deref().unwrap_or(&fragment)),
            DeclKind::Arg,
            &ident,
            &[
                or_null(&name),
                &c_str_literal(&arg.signature),
                or_null(&annotations),
            ],
        );
        self.push(&ident, DeclKind::Arg, annotations.into_iter().collect(), text);
        Ok(ident)
    }

    fn gen_method(&mut self, m: &Method, base: &str) -> Result<String, GenerateError> {
        let ident = self.claim(
            format!("{base}_method_{}", normalize(&m.name)),
            DeclKind::Method,
        )?;
        let in_args = self.gen_args(&m.in_args, &ident, Role::In)?;
        let out_args = self.gen_args(&m.out_args, &ident, Role::Out)?;
        let annotations = self.gen_annotations(&m.annotations, &ident, 0)?;
        let text = self.render_struct(
            &format!("Method {}", m.name),
            DeclKind::Method,
            &ident,
            &[
                &c_str_literal(&m.name),
                or_null(&in_args),
                or_null(&out_args),
                or_null(&annotations),
            ],
        );
        let refs = [in_args, out_args, annotations].into_iter().flatten().collect();
        self.push(&ident, DeclKind::Method, refs, text);
        Ok(ident)
    }

    fn gen_signal(&mut self, s: &Signal, base: &str) -> Result<String, GenerateError> {
        let ident = self.claim(
            format!("{base}_signal_{}", normalize(&s.name)),
            DeclKind::Signal,
        )?;
        let args = self.gen_args(&s.args, &ident, Role::Out)?;
        let annotations = self.gen_annotations(&s.annotations, &ident, 0)?;
        let text = self.render_struct(
            &format!("Signal {}", s.name),
            DeclKind::Signal,
            &ident,
            &[&c_str_literal(&s.name), or_null(&args), or_null(&annotations)],
        );
        let refs = [args, annotations].into_iter().flatten().collect();
        self.push(&ident, DeclKind::Signal, refs, text);
        Ok(ident)
    }

    fn gen_property(&mut self, p: &Property, base: &str) -> Result<String, GenerateError> {
        let ident = self.claim(
            format!("{base}_property_{}", normalize(&p.name)),
            DeclKind::Property,
        )?;
        let annotations = self.gen_annotations(&p.annotations, &ident, 0)?;
        let text = self.render_struct(
            &format!("Property {}", p.name),
            DeclKind::Property,
            &ident,
            &[
                &c_str_literal(&p.name),
                &c_str_literal(&p.signature),
                property_flags(p.readable, p.writable),
                or_null(&annotations),
            ],
        );
        self.push(&ident, DeclKind::Property, annotations.into_iter().collect(), text);
        Ok(ident)
    }

    fn gen_interface(&mut self, iface: &Interface) -> Result<InterfaceBlock, GenerateError> {
        let base = unique(
            &mut self.scopes,
            format!("{}{}", self.opts.prefix, normalize(&iface.name)),
            DeclKind::Interface,
            self.opts.on_collision,
        )?;
        tracing::debug!(interface = %iface.name, %base, "generating interface");

        let start = self.decls.len();
        let mut methods = Vec::with_capacity(iface.methods.len());
        for m in &iface.methods {
            methods.push(self.gen_method(m, &base)?);
        }
        self.open_section(start, format!("Methods for {base}"));
        let methods = self.gen_pointers(
            DeclKind::MethodPointers,
            format!("{base}_method_pointers"),
            methods,
        )?;

        let start = self.decls.len();
        let mut signals = Vec::with_capacity(iface.signals.len());
        for s in &iface.signals {
            signals.push(self.gen_signal(s, &base)?);
        }
        self.open_section(start, format!("Signals for {base}"));
        let signals = self.gen_pointers(
            DeclKind::SignalPointers,
            format!("{base}_signal_pointers"),
            signals,
        )?;

        let start = self.decls.len();
        let mut properties = Vec::with_capacity(iface.properties.len());
        for p in &iface.properties {
            properties.push(self.gen_property(p, &base)?);
        }
        self.open_section(start, format!("Properties for {base}"));
        let properties = self.gen_pointers(
            DeclKind::PropertyPointers,
            format!("{base}_property_pointers"),
            properties,
        )?;

        let annotations = self.gen_annotations(&iface.annotations, &base, 0)?;

        let ident = self.claim(format!("{base}_interface"), DeclKind::Interface)?;
        let text = self.render_struct(
            "Interface info",
            DeclKind::Interface,
            &ident,
            &[
                &c_str_literal(&iface.name),
                or_null(&methods),
                or_null(&signals),
                or_null(&properties),
                or_null(&annotations),
            ],
        );
        let refs = [methods, signals, properties, annotations]
            .into_iter()
            .flatten()
            .collect();
        self.push(&ident, DeclKind::Interface, refs, text);

        let accessor = self.claim(format!("{base}_get_interface_info"), DeclKind::Accessor)?;
        let mut s = String::new();
        emitln!(s, "GDBusInterfaceInfo *");
        emitln!(s, "{accessor}(void)");
        emitln!(s, "{{");
        emitln!(s, "{}return &{ident};", self.opts.indent);
        emitln!(s, "}}");
        self.push(&accessor, DeclKind::Accessor, vec![ident], s);

        Ok(InterfaceBlock {
            name: iface.name.clone(),
            decls: std::mem::take(&mut self.decls),
        })
    }
}

/// Turns `doc` into static GDBus introspection declarations.
///
/// Interfaces keep their document order. Within an interface every
/// declaration comes after the declarations it references.
#[tracing::instrument(skip_all, fields(interfaces = doc.interfaces.len()))]
pub fn generate(doc: &Document, options: &GenOptions) -> Result<Output, GenerateError> {
    let mut g = Generator::new(options);
    let mut interfaces = Vec::with_capacity(doc.interfaces.len());
    for iface in &doc.interfaces {
        interfaces.push(g.gen_interface(iface)?);
    }
    Ok(Output { interfaces })
}
