// signature.rs — Materialize pipeline declarations into parameter handles
//
// Turns a parsed declaration file into live `ImageParam`, `OutputImageParam`
// and scalar `Parameter` handles, installs their ranges and bound
// constraints, and assembles the entry point's `Signature` in declaration
// order. Handles are created in a first pass so expressions may refer to
// arguments declared further down.
//
// Preconditions: none; syntax errors from the parser are reported here.
// Postconditions: on success every declared argument appears exactly once
//   in the signature, in source order.
// Failure modes: E0300 syntax, E0301 unknown type, E0302 unknown name,
//   E0303 duplicate name, E0304 malformed constraint target, E0101
//   dimension out of range. Inverted ranges are W0100 warnings.
// Side effects: input image names are reserved in the process-wide table.

use std::collections::HashMap;

use crate::argument::{Argument, Signature};
use crate::ast::{self, Declarations, ItemKind, Span};
use crate::diag::{codes, Diagnostic};
use crate::expr::{BinOp, Expr};
use crate::image_param::{ImageParam, OutputImageParam};
use crate::param::range_warning;
use crate::parameter::{BoundField, Parameter};
use crate::parser;
use crate::types::ScalarType;

/// The handle behind one declared argument.
#[derive(Debug, Clone)]
pub enum Declared {
    Input(ImageParam),
    Output(OutputImageParam),
    Scalar(Parameter),
}

impl Declared {
    pub fn kind(&self) -> &'static str {
        match self {
            Declared::Input(_) => "input",
            Declared::Output(_) => "output",
            Declared::Scalar(_) => "param",
        }
    }

    /// The image view of an input or output.
    pub fn image(&self) -> Option<&OutputImageParam> {
        match self {
            Declared::Input(img) => Some(img.as_output()),
            Declared::Output(img) => Some(img),
            Declared::Scalar(_) => None,
        }
    }

    fn to_argument(&self) -> Result<Argument, Diagnostic> {
        match self {
            Declared::Input(img) => img.to_argument(),
            Declared::Output(img) => img.to_argument(),
            Declared::Scalar(p) => Ok(Argument::scalar(p.name(), p.ty())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeclaredArg {
    pub name: String,
    pub handle: Declared,
    pub span: Span,
}

/// A materialized pipeline declaration.
#[derive(Debug, Clone)]
pub struct PipelineDecl {
    pub name: String,
    pub arguments: Vec<DeclaredArg>,
    pub signature: Signature,
    pub warnings: Vec<Diagnostic>,
}

impl PipelineDecl {
    pub fn get(&self, name: &str) -> Option<&Declared> {
        self.arguments
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.handle)
    }

    pub fn image(&self, name: &str) -> Option<&OutputImageParam> {
        self.get(name)?.image()
    }

    pub fn scalar(&self, name: &str) -> Option<&Parameter> {
        match self.get(name)? {
            Declared::Scalar(p) => Some(p),
            _ => None,
        }
    }
}

/// Parse and materialize a declaration file.
pub fn load(source: &str) -> Result<PipelineDecl, Vec<Diagnostic>> {
    let result = parser::parse(source);
    if !result.errors.is_empty() {
        return Err(result
            .errors
            .iter()
            .map(|e| Diagnostic::error(codes::E0300, e.to_string()).with_span(*e.span()))
            .collect());
    }
    match result.declarations {
        Some(decls) => materialize(&decls),
        None => Err(vec![Diagnostic::error(codes::E0300, "no declarations parsed")]),
    }
}

pub fn materialize(decls: &Declarations) -> Result<PipelineDecl, Vec<Diagnostic>> {
    let mut m = Materializer::default();
    m.declare(decls);
    m.install(decls);
    m.finish(decls.span)
}

// ── Materializer ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Materializer {
    pipeline: Option<ast::Ident>,
    arguments: Vec<DeclaredArg>,
    index: HashMap<String, usize>,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

fn parse_type(id: &ast::Ident) -> Result<ScalarType, Diagnostic> {
    ScalarType::parse(&id.name).ok_or_else(|| {
        Diagnostic::error(codes::E0301, format!("unknown type '{}'", id.name))
            .with_span(id.span)
            .with_hint("types are bool, handle, int8..int64, uint8..uint64, float32, float64")
    })
}

/// Attach `span` unless the diagnostic already points somewhere narrower.
fn located(diag: Diagnostic, span: Span) -> Diagnostic {
    if diag.span.is_some() {
        diag
    } else {
        diag.with_span(span)
    }
}

fn dimension_count(dims: Option<(u64, Span)>) -> Result<usize, Diagnostic> {
    match dims {
        None => Ok(0),
        Some((n, span)) => usize::try_from(n).map_err(|_| {
            Diagnostic::error(codes::E0300, format!("{n} dimensions is too many")).with_span(span)
        }),
    }
}

impl Materializer {
    /// First pass: one handle per declared name.
    fn declare(&mut self, decls: &Declarations) {
        for item in &decls.items {
            let (name, made) = match &item.kind {
                ItemKind::Pipeline(id) => {
                    if let Some(first) = &self.pipeline {
                        self.errors.push(
                            Diagnostic::error(
                                codes::E0303,
                                format!("pipeline named twice: '{}' then '{}'", first.name, id.name),
                            )
                            .with_span(id.span)
                            .with_related(first.span, "first named here"),
                        );
                    } else {
                        self.pipeline = Some(id.clone());
                    }
                    continue;
                }
                ItemKind::Input(img) => (
                    &img.name,
                    parse_type(&img.ty).and_then(|ty| {
                        let dims = dimension_count(img.dims)?;
                        Ok(Declared::Input(ImageParam::with_name(ty, dims, &img.name.name)))
                    }),
                ),
                ItemKind::Output(img) => (
                    &img.name,
                    parse_type(&img.ty).and_then(|ty| {
                        let dims = dimension_count(img.dims)?;
                        Ok(Declared::Output(OutputImageParam::with_name(
                            ty,
                            dims,
                            &img.name.name,
                        )))
                    }),
                ),
                ItemKind::Param(p) => (
                    &p.name,
                    parse_type(&p.ty).map(|ty| Declared::Scalar(Parameter::scalar(ty, &p.name.name))),
                ),
                ItemKind::Constrain(_) => continue,
            };
            let handle = match made {
                Ok(handle) => handle,
                Err(diag) => {
                    self.errors.push(diag);
                    continue;
                }
            };
            if let Some(&first) = self.index.get(&name.name) {
                let first = &self.arguments[first];
                self.errors.push(
                    Diagnostic::error(
                        codes::E0303,
                        format!("'{}' is already declared as {}", name.name, first.handle.kind()),
                    )
                    .with_span(name.span)
                    .with_related(first.span, "first declared here"),
                );
                continue;
            }
            tracing::trace!(name = %name.name, kind = handle.kind(), "declared");
            self.index.insert(name.name.clone(), self.arguments.len());
            self.arguments.push(DeclaredArg {
                name: name.name.clone(),
                handle,
                span: name.span,
            });
        }
    }

    /// Second pass: ranges and constraints.
    fn install(&mut self, decls: &Declarations) {
        for item in &decls.items {
            let result = match &item.kind {
                ItemKind::Param(p) => match &p.range {
                    Some((lo, hi)) => self.install_range(&p.name, lo, hi),
                    None => Ok(()),
                },
                ItemKind::Constrain(c) => self.install_constraint(c),
                _ => Ok(()),
            };
            if let Err(diag) = result {
                self.errors.push(located(diag, item.span));
            }
        }
    }

    fn install_range(&mut self, name: &ast::Ident, lo: &ast::Expr, hi: &ast::Expr) -> Result<(), Diagnostic> {
        // The declaration itself may have failed; that error is already recorded.
        let Some(param) = self.lookup(&name.name).and_then(|d| match d {
            Declared::Scalar(p) => Some(p.clone()),
            _ => None,
        }) else {
            return Ok(());
        };
        let min = self.lower(lo)?;
        let max = self.lower(hi)?;
        param.set_min_value(Some(Expr::cast(param.ty(), min)));
        param.set_max_value(Some(Expr::cast(param.ty(), max)));
        if let Some(warning) = range_warning(&param) {
            tracing::debug!(param = param.name(), "{}", warning);
            self.warnings.push(warning.with_span(name.span));
        }
        Ok(())
    }

    fn install_constraint(&mut self, c: &ast::ConstrainDecl) -> Result<(), Diagnostic> {
        let (image, field, dim) = self.resolve_bound(&c.target)?;
        let value = self.lower(&c.value)?;
        match field {
            BoundField::Min => image.set_min(dim, value),
            BoundField::Extent => image.set_extent(dim, value),
            BoundField::Stride => image.set_stride(dim, value),
        }
        .map(|_| ())
    }

    fn lookup(&self, name: &str) -> Option<&Declared> {
        self.index.get(name).map(|&i| &self.arguments[i].handle)
    }

    fn resolve_bound(&self, b: &ast::BoundRef) -> Result<(OutputImageParam, BoundField, usize), Diagnostic> {
        let declared = self.lookup(&b.image.name).ok_or_else(|| {
            Diagnostic::error(codes::E0302, format!("unknown image '{}'", b.image.name))
                .with_span(b.image.span)
        })?;
        let image = declared.image().ok_or_else(|| {
            Diagnostic::error(
                codes::E0304,
                format!("'{}' is a scalar parameter and has no bounds", b.image.name),
            )
            .with_span(b.image.span)
        })?;
        let field = BoundField::parse(&b.field.name).ok_or_else(|| {
            Diagnostic::error(
                codes::E0304,
                format!("'{}' is not a bound of {}", b.field.name, b.image.name),
            )
            .with_span(b.field.span)
            .with_hint("bounds are min, extent and stride")
        })?;
        let (dim, dim_span) = b.dim;
        let dims = image.dimensions();
        let dim = usize::try_from(dim).ok().filter(|&d| d < dims).ok_or_else(|| {
            Diagnostic::error(
                codes::E0101,
                format!(
                    "dimension {} of {} is out of range; it has {} dimension{}",
                    dim,
                    b.image.name,
                    dims,
                    if dims == 1 { "" } else { "s" }
                ),
            )
            .with_span(dim_span)
        })?;
        Ok((image.clone(), field, dim))
    }

    /// Lower a parsed expression to an `Expr` over the declared handles.
    fn lower(&self, e: &ast::Expr) -> Result<Expr, Diagnostic> {
        match e {
            ast::Expr::Int(n, span) => match (i32::try_from(*n), i64::try_from(*n)) {
                (Ok(v), _) => Ok(Expr::int32(v)),
                (_, Ok(v)) => Ok(Expr::make_const(ScalarType::int(64), v)),
                _ => Err(Diagnostic::error(codes::E0300, format!("literal {n} is out of range"))
                    .with_span(*span)),
            },
            ast::Expr::Float(v, _) => Ok(Expr::make_float(ScalarType::float(32), *v)),
            ast::Expr::Name(id) => match self.lookup(&id.name) {
                Some(Declared::Scalar(p)) => Ok(Expr::param_variable(p.ty(), p.name(), p.clone())),
                Some(other) => Err(Diagnostic::error(
                    codes::E0302,
                    format!("{} '{}' can't be used as a value", other.kind(), id.name),
                )
                .with_span(id.span)
                .with_hint(format!("refer to its bounds, e.g. {}.extent.0", id.name))),
                None => Err(Diagnostic::error(codes::E0302, format!("unknown name '{}'", id.name))
                    .with_span(id.span)),
            },
            ast::Expr::Bound(b) => {
                let (image, field, dim) = self.resolve_bound(b)?;
                Ok(image.bound(field, dim))
            }
            ast::Expr::Neg(inner, _) => Ok(-self.lower(inner)?),
            ast::Expr::Binary { op, lhs, rhs, .. } => {
                let op = match op {
                    ast::BinOp::Add => BinOp::Add,
                    ast::BinOp::Sub => BinOp::Sub,
                    ast::BinOp::Mul => BinOp::Mul,
                    ast::BinOp::Div => BinOp::Div,
                };
                Ok(Expr::binary(op, self.lower(lhs)?, self.lower(rhs)?))
            }
            ast::Expr::Call { callee, args, span } => self.lower_call(callee, args, *span),
        }
    }

    fn lower_call(&self, callee: &ast::Ident, args: &[ast::Expr], span: Span) -> Result<Expr, Diagnostic> {
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(Diagnostic::error(
                    codes::E0300,
                    format!(
                        "{} takes {} argument{}, {} given",
                        callee.name,
                        expected,
                        if expected == 1 { "" } else { "s" },
                        args.len()
                    ),
                )
                .with_span(span))
            }
        };
        match callee.name.as_str() {
            "min" | "max" => {
                arity(2)?;
                let (a, b) = (self.lower(&args[0])?, self.lower(&args[1])?);
                Ok(if callee.name == "min" {
                    Expr::min(a, b)
                } else {
                    Expr::max(a, b)
                })
            }
            name => {
                let ty = ScalarType::parse(name).ok_or_else(|| {
                    Diagnostic::error(codes::E0302, format!("unknown function '{name}'"))
                        .with_span(callee.span)
                        .with_hint("calls are min, max or a cast to a type name")
                })?;
                arity(1)?;
                Ok(Expr::cast(ty, self.lower(&args[0])?))
            }
        }
    }

    fn finish(mut self, whole: Span) -> Result<PipelineDecl, Vec<Diagnostic>> {
        let name = match &self.pipeline {
            Some(id) => id.name.clone(),
            None => {
                self.errors.push(
                    Diagnostic::error(codes::E0300, "missing 'pipeline <name>' declaration")
                        .with_span(whole),
                );
                String::new()
            }
        };
        let mut signature = Signature::new(&name);
        for arg in &self.arguments {
            if let Err(diag) = arg.handle.to_argument().and_then(|a| signature.push(a)) {
                self.errors.push(located(diag, arg.span));
            }
        }
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        tracing::debug!(pipeline = %name, arguments = signature.arguments.len(), "materialized");
        Ok(PipelineDecl {
            name,
            arguments: self.arguments,
            signature,
            warnings: self.warnings,
        })
    }
}
