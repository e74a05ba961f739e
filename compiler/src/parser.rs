// parser.rs — Parser for pipeline declaration files
//
// Parses the lexer's token stream into `ast::Declarations` with chumsky
// combinators. One declaration per line; blank lines and comments are free.
//
// Preconditions: none; lexing happens inside `parse`.
// Postconditions: `declarations` is `Some` whenever recovery produced a tree.
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

#[derive(Debug)]
pub struct ParseResult {
    pub declarations: Option<Declarations>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Lex then parse a declaration file.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(lex_result.tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (declarations, parse_errors) = declarations_parser(source)
        .parse(stream)
        .into_output_errors();

    let mut errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| Rich::custom(e.span, e.message))
        .collect();
    errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        declarations,
        errors,
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = join(lhs.span(), rhs.span());
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span,
    }
}

fn declarations_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Declarations, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start..span.end].to_string(),
            span,
        }
    });

    let int = select! { Token::Int(n) = e => (n, e.span()) };

    // ── Bound reference: image '.' field '.' INT ──

    let bound_ref = ident
        .clone()
        .then_ignore(just(Token::Dot))
        .then(ident.clone())
        .then_ignore(just(Token::Dot))
        .then(int)
        .map_with(|((image, field), dim), e| BoundRef {
            image,
            field,
            dim,
            span: e.span(),
        });

    // ── Expressions ──

    let expr = recursive(|expr| {
        let literal = select! {
            Token::Int(n) = e => Expr::Int(n, e.span()),
            Token::Float(v) = e => Expr::Float(v, e.span()),
        };

        let call = ident
            .clone()
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|(callee, args), e| Expr::Call {
                callee,
                args,
                span: e.span(),
            });

        let atom = choice((
            literal,
            bound_ref.clone().map(Expr::Bound),
            call,
            ident.clone().map(Expr::Name),
            expr.delimited_by(just(Token::LParen), just(Token::RParen)),
        ));

        let unary = just(Token::Minus)
            .map_with(|_, e| -> SimpleSpan { e.span() })
            .repeated()
            .foldr(atom, |op: SimpleSpan, rhs: Expr| {
                let span = join(op, rhs.span());
                Expr::Neg(Box::new(rhs), span)
            });

        let product = unary.clone().foldl(
            choice((
                just(Token::Star).to(BinOp::Mul),
                just(Token::Slash).to(BinOp::Div),
            ))
            .then(unary)
            .repeated(),
            |lhs, (op, rhs)| binary(op, lhs, rhs),
        );

        product.clone().foldl(
            choice((
                just(Token::Plus).to(BinOp::Add),
                just(Token::Minus).to(BinOp::Sub),
            ))
            .then(product)
            .repeated(),
            |lhs, (op, rhs)| binary(op, lhs, rhs),
        )
    });

    // ── Declarations ──

    let dims = int
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .or_not();

    let image_decl = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then(ident.clone())
        .then(dims)
        .map(|((name, ty), dims)| ImageDecl { name, ty, dims });

    let pipeline_item = just(Token::Pipeline)
        .ignore_then(ident.clone())
        .map(ItemKind::Pipeline);

    let input_item = just(Token::Input)
        .ignore_then(image_decl.clone())
        .map(ItemKind::Input);

    let output_item = just(Token::Output)
        .ignore_then(image_decl)
        .map(ItemKind::Output);

    let range = just(Token::In).ignore_then(
        expr.clone()
            .then_ignore(just(Token::Comma))
            .then(expr.clone())
            .delimited_by(just(Token::LBracket), just(Token::RBracket)),
    );

    let param_item = just(Token::Param)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Colon))
        .then(ident.clone())
        .then(range.or_not())
        .map(|((name, ty), range)| ItemKind::Param(ParamDecl { name, ty, range }));

    let constrain_item = just(Token::Constrain)
        .ignore_then(bound_ref)
        .then_ignore(just(Token::Equals))
        .then(expr)
        .map(|(target, value)| ItemKind::Constrain(ConstrainDecl { target, value }));

    let item = choice((
        pipeline_item,
        input_item,
        output_item,
        param_item,
        constrain_item,
    ))
    .map_with(|kind, e| Item {
        kind,
        span: e.span(),
    });

    let nl = just(Token::Newline).repeated().ignored();

    nl.clone()
        .ignore_then(
            item.separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(|items, e| Declarations {
            items,
            span: e.span(),
        })
}
