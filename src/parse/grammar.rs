use std::cell::RefCell;

use winnow::ascii::{digit1, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, opt, peek, preceded};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::stream::{LocatingSlice, Location, Stateful, Stream};
use winnow::token::{any, take_until, take_while};

use crate::types::{
    Attribute, AttributeValue, Body, Coding, CompareOp, Condition, ConditionKind, Document,
    Literal, Mapping, NodeOp, Repeat, Resource, Rule, SchemaRef, Span, Value,
};

/// Problems that do not stop parsing. The offending construct is dropped.
#[derive(Debug, Default)]
pub(super) struct Recovered {
    pub(super) problems: RefCell<Vec<(String, Span)>>,
}

pub(super) type Input<'i> = Stateful<LocatingSlice<&'i str>, &'i Recovered>;

fn expected(what: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(what))
}

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut Input<'_>) -> ModalResult<()> {
    let _: () = winnow::combinator::repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_whitespace()).void(),
            ("//", till_line_ending).void(),
            ("/*", cut_err(take_until(0.., "*/")), cut_err("*/")).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers ------------------------------------------------------------

fn ident<'i>(input: &mut Input<'i>) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic()),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// A source field id. May contain `${var}` placeholders.
fn field_id<'i>(input: &mut Input<'i>) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '{' | '}')
    })
    .context(expected("field id"))
    .parse_next(input)
}

/// A resource id. May contain `${var}` placeholders.
fn resource_id<'i>(input: &mut Input<'i>) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '$' | '{' | '}')
    })
    .context(expected("resource id"))
    .parse_next(input)
}

fn token<'i>(input: &mut Input<'i>) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        !c.is_whitespace() && !matches!(c, '|' | ')' | '(' | ';' | ',' | '}' | '{')
    })
    .parse_next(input)
}

// -- Literals ---------------------------------------------------------------

fn quoted(input: &mut Input<'_>) -> ModalResult<String> {
    let delim = alt(('\'', '"')).parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any)
            .context(expected("closing quote"))
            .parse_next(input)?;
        match ch {
            c if c == delim => return Ok(s),
            '\\' => {
                let esc = cut_err(any).parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    c @ ('\'' | '"' | '\\') => s.push(c),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

enum Number {
    Int(i64),
    Float(f64),
}

fn number(input: &mut Input<'_>) -> ModalResult<Number> {
    let text = (opt('-'), digit1, opt(('.', digit1)))
        .take()
        .parse_next(input)?;
    if text.contains('.') {
        let f: f64 = text.parse().map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Number::Float(f))
    } else {
        let i: i64 = text.parse().map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Number::Int(i))
    }
}

// -- Conditions (precedence: OR < AND < ^ < primary) ------------------------

fn compare_op(input: &mut Input<'_>) -> ModalResult<CompareOp> {
    ws.parse_next(input)?;
    alt((
        ">=".value(CompareOp::Gte),
        ">".value(CompareOp::Gt),
        "<=".value(CompareOp::Lte),
        "<".value(CompareOp::Lt),
        "!=".value(CompareOp::Neq),
        "==".value(CompareOp::Eq),
        "=".value(CompareOp::Eq),
    ))
    .context(expected("comparison operator"))
    .parse_next(input)
}

fn condition_literal(input: &mut Input<'_>) -> ModalResult<Literal> {
    ws.parse_next(input)?;
    alt((
        quoted.map(Literal::String),
        number.map(|n| match n {
            Number::Int(i) => Literal::Int(i),
            Number::Float(f) => Literal::Float(f),
        }),
    ))
    .context(expected("literal"))
    .parse_next(input)
}

fn parenthesized_field<'i>(input: &mut Input<'i>) -> ModalResult<&'i str> {
    delimited((ws, '(', ws), cut_err(field_id), (ws, cut_err(')'))).parse_next(input)
}

fn condition_kind(input: &mut Input<'_>) -> ModalResult<ConditionKind> {
    alt((
        "TRUE".value(ConditionKind::True),
        "FALSE".value(ConditionKind::False),
        preceded("NOTNULL", cut_err(parenthesized_field))
            .map(|f| ConditionKind::NotNull(f.to_owned())),
        preceded("NULL", cut_err(parenthesized_field)).map(|f| ConditionKind::Null(f.to_owned())),
        preceded(
            "VALUE",
            cut_err((parenthesized_field, compare_op, condition_literal)),
        )
        .map(|(f, op, value)| ConditionKind::Expression {
            field_id: f.to_owned(),
            op,
            value,
        }),
    ))
    .parse_next(input)
}

fn primary(input: &mut Input<'_>) -> ModalResult<Condition> {
    ws.parse_next(input)?;
    alt((
        delimited('(', cut_err(condition), (ws, cut_err(')'))),
        condition_kind
            .with_span()
            .map(|(kind, span)| Condition::new(kind).with_span(span.into())),
    ))
    .context(expected("condition"))
    .parse_next(input)
}

fn unary(input: &mut Input<'_>) -> ModalResult<Condition> {
    ws.parse_next(input)?;
    if opt('^').parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        Ok(!inner)
    } else {
        primary(input)
    }
}

fn binary(
    input: &mut Input<'_>,
    symbol: char,
    keyword: &'static str,
    op: NodeOp,
    operand: fn(&mut Input<'_>) -> ModalResult<Condition>,
) -> ModalResult<Condition> {
    let mut acc = operand(input)?;
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt(alt((symbol.void(), keyword.void())))
            .parse_next(input)?
            .is_none()
        {
            input.reset(&checkpoint);
            return Ok(acc);
        }
        let right = cut_err(operand).parse_next(input)?;
        let span = Span::new(acc.span.start, right.span.end);
        acc = Condition::new(ConditionKind::Node {
            op,
            left: Box::new(acc),
            right: Box::new(right),
        })
        .with_span(span);
    }
}

fn and_cond(input: &mut Input<'_>) -> ModalResult<Condition> {
    binary(input, '&', "AND", NodeOp::And, unary)
}

fn or_cond(input: &mut Input<'_>) -> ModalResult<Condition> {
    binary(input, '|', "OR", NodeOp::Or, and_cond)
}

pub(super) fn condition(input: &mut Input<'_>) -> ModalResult<Condition> {
    ws.parse_next(input)?;
    or_cond(input)
}

// -- Values -----------------------------------------------------------------

fn args<'i, O>(
    mut inner: impl Parser<Input<'i>, O, ErrMode<winnow::error::ContextError>>,
) -> impl Parser<Input<'i>, O, ErrMode<winnow::error::ContextError>> {
    move |input: &mut Input<'i>| {
        (ws, cut_err('(')).parse_next(input)?;
        ws.parse_next(input)?;
        let out = cut_err(inner.by_ref()).parse_next(input)?;
        (ws, cut_err(')')).parse_next(input)?;
        Ok(out)
    }
}

fn concept_literal(input: &mut Input<'_>) -> ModalResult<Value> {
    let system = token.context(expected("code system")).parse_next(input)?;
    cut_err('|').parse_next(input)?;
    let code = cut_err(token).context(expected("code")).parse_next(input)?;
    let display = opt(preceded('|', cut_err(quoted))).parse_next(input)?;
    Ok(Value::ConceptLiteral {
        system: system.to_owned(),
        code: code.to_owned(),
        display,
    })
}

fn reference(input: &mut Input<'_>) -> ModalResult<Value> {
    let resource_type = ident.context(expected("resource type")).parse_next(input)?;
    let id = delimited((ws, cut_err('<'), ws), cut_err(resource_id), (ws, cut_err('>')))
        .parse_next(input)?;
    Ok(Value::Reference {
        resource_type: resource_type.to_owned(),
        id: id.to_owned(),
    })
}

fn field_value(input: &mut Input<'_>) -> ModalResult<Value> {
    let id = field_id.parse_next(input)?;
    let precision = opt(preceded((ws, ',', ws), cut_err(ident))).parse_next(input)?;
    Ok(Value::Field {
        field_id: id.to_owned(),
        precision: precision.map(str::to_owned),
    })
}

fn value(input: &mut Input<'_>) -> ModalResult<Value> {
    ws.parse_next(input)?;
    alt((
        preceded("CONCEPT_LITERAL", args(concept_literal)),
        preceded("CONCEPT_SELECTED", args(field_id))
            .map(|f: &str| Value::ConceptSelected(f.to_owned())),
        preceded("CONCEPT", args(field_id)).map(|f: &str| Value::Concept(f.to_owned())),
        preceded("CODE_LITERAL", args(token)).map(|c: &str| Value::CodeLiteral(c.to_owned())),
        preceded("CODE_SELECTED", args(field_id)).map(|f: &str| Value::CodeSelected(f.to_owned())),
        preceded("REF", args(reference)),
        preceded("VALUE", args(field_value)),
        "TRUE".value(Value::Boolean(true)),
        "FALSE".value(Value::Boolean(false)),
        quoted.map(Value::String),
        number.map(|n| match n {
            Number::Int(i) => Value::Integer(i),
            Number::Float(f) => Value::Decimal(f),
        }),
    ))
    .context(expected("value"))
    .parse_next(input)
}

// -- Resources --------------------------------------------------------------

fn index(input: &mut Input<'_>) -> ModalResult<(Option<usize>, Option<String>)> {
    '['.parse_next(input)?;
    ws.parse_next(input)?;
    let out = cut_err(alt((
        digit1.try_map(|d: &str| d.parse::<usize>()).map(|i| (Some(i), None)),
        ("${", ident, '}')
            .take()
            .map(|t: &str| (None, Some(t.to_owned()))),
    )))
    .context(expected("index"))
    .parse_next(input)?;
    (ws, cut_err(']')).parse_next(input)?;
    Ok(out)
}

fn attribute(input: &mut Input<'_>) -> ModalResult<Attribute> {
    let name = take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_')
        .context(expected("attribute name"))
        .parse_next(input)?;
    let idx = opt(index).parse_next(input)?;
    let mut attr = Attribute::new(name);
    if let Some((index, template)) = idx {
        attr.index = index;
        attr.index_template = template;
        attr.is_list = true;
    }
    Ok(attr)
}

fn attribute_value(input: &mut Input<'_>) -> ModalResult<AttributeValue> {
    ws.parse_next(input)?;
    let ((attributes, value), span) = (
        (
            attribute,
            winnow::combinator::repeat(0.., preceded('.', cut_err(attribute))),
        )
            .map(|(first, rest): (Attribute, Vec<Attribute>)| {
                let mut all = vec![first];
                all.extend(rest);
                all
            }),
        preceded((ws, cut_err('=')), cut_err(value)),
    )
        .with_span()
        .parse_next(input)?;
    Ok(AttributeValue::new(attributes, value).with_span(span.into()))
}

/// `Type<id>` followed by either `: * a = v * b = v` or `-> a = v, b = v;`.
fn resource(input: &mut Input<'_>) -> ModalResult<Resource> {
    let start = input.current_token_start();
    let resource_type = ident.parse_next(input)?;
    let id = delimited((ws, '<', ws), cut_err(resource_id), (ws, cut_err('>')))
        .parse_next(input)?;
    let mut res = Resource::new(resource_type, id);
    ws.parse_next(input)?;
    if opt("->").parse_next(input)?.is_some() {
        res.attributes.push(cut_err(attribute_value).parse_next(input)?);
        while opt((ws, ',')).parse_next(input)?.is_some() {
            res.attributes.push(cut_err(attribute_value).parse_next(input)?);
        }
        (ws, cut_err(';'))
            .context(expected("';'"))
            .parse_next(input)?;
    } else {
        cut_err(':')
            .context(expected("':' or '->'"))
            .parse_next(input)?;
        while opt((ws, '*')).parse_next(input)?.is_some() {
            res.attributes.push(cut_err(attribute_value).parse_next(input)?);
        }
    }
    res.span = Span::new(start, input.previous_token_end());
    Ok(res)
}

fn starts_resource(input: &mut Input<'_>) -> ModalResult<()> {
    peek((ident, ws, '<')).void().parse_next(input)
}

// -- Rules ------------------------------------------------------------------

fn repeat_bound(input: &mut Input<'_>) -> ModalResult<(String, Span)> {
    ws.parse_next(input)?;
    take_while(1.., |c: char| {
        !c.is_whitespace() && !matches!(c, '.' | ':' | ')')
    })
    .with_span()
    .map(|(s, span): (&str, _)| (s.to_owned(), Span::from(span)))
    .context(expected("repeat bound"))
    .parse_next(input)
}

/// `REPEAT(start..end: var)`. Bounds that are not integers are recorded and
/// yield `Ok(None)` so the rule can be dropped.
fn repeat_prefix(input: &mut Input<'_>) -> ModalResult<Option<Repeat>> {
    let ((start, end, var), span) = preceded(
        ("REPEAT", ws, '('),
        cut_err((
            repeat_bound,
            preceded((ws, ".."), repeat_bound),
            preceded((ws, ':', ws), ident),
            (ws, ')'),
        )),
    )
    .map(|(s, e, v, _)| (s, e, v))
    .with_span()
    .parse_next(input)?;

    let parse_bound = |(text, span): &(String, Span)| match text.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            input.state.problems.borrow_mut().push((
                format!("Invalid REPEAT bound '{text}': expected an integer."),
                *span,
            ));
            None
        }
    };
    let (Some(s), Some(e)) = (parse_bound(&start), parse_bound(&end)) else {
        return Ok(None);
    };
    let mut repeat = Repeat::new(s, e, var);
    repeat.span = span.into();
    Ok(Some(repeat))
}

fn braced_body(input: &mut Input<'_>) -> ModalResult<Body> {
    (ws, cut_err('{'))
        .context(expected("'{'"))
        .parse_next(input)?;
    let mut body = Body::default();
    loop {
        ws.parse_next(input)?;
        if opt('}').parse_next(input)?.is_some() {
            return Ok(body);
        }
        if starts_resource(input).is_ok() {
            body.resources.push(cut_err(resource).parse_next(input)?);
        } else if let Some(rule) = cut_err(rule).parse_next(input)? {
            body.rules.push(rule);
        }
    }
}

/// One rule, or `None` when a REPEAT prefix was malformed.
pub(super) fn rule(input: &mut Input<'_>) -> ModalResult<Option<Rule>> {
    ws.parse_next(input)?;
    let start = input.current_token_start();
    let repeat = opt(repeat_prefix).parse_next(input)?;
    let cond = condition.context(expected("rule")).parse_next(input)?;
    let body = cut_err(braced_body).parse_next(input)?;
    let else_body = opt(preceded((ws, "ELSE"), cut_err(braced_body))).parse_next(input)?;
    let span = Span::new(start, input.previous_token_end());

    match repeat {
        Some(None) => Ok(None),
        repeat => Ok(Some(Rule {
            repeat: repeat.flatten(),
            condition: cond,
            body,
            else_body,
            span,
        })),
    }
}

// -- Sections ---------------------------------------------------------------

fn header(input: &mut Input<'_>, name: &'static str) -> ModalResult<bool> {
    Ok(opt((name, ws, ':', ws)).parse_next(input)?.is_some())
}

fn alias(input: &mut Input<'_>) -> ModalResult<(String, String)> {
    let name = ('$', ident).take().parse_next(input)?;
    let target = preceded((ws, cut_err('='), ws), cut_err(alt((quoted, token.map(str::to_owned)))))
        .parse_next(input)?;
    Ok((name.to_owned(), target))
}

fn mapping(input: &mut Input<'_>) -> ModalResult<Mapping> {
    let ((field, label, (system, code, display)), span) = (
        field_id,
        opt(preceded(ws, quoted)),
        preceded(
            (ws, cut_err("->"), ws),
            cut_err((
                take_while(1.., |c: char| c != '|' && c != ';' && !c.is_whitespace()),
                preceded('|', token),
                opt(preceded('|', quoted)),
            )),
        ),
    )
        .with_span()
        .parse_next(input)?;
    (ws, cut_err(';'))
        .context(expected("';'"))
        .parse_next(input)?;
    let mut target = Coding::new(system, code);
    target.display = display;
    Ok(Mapping {
        field_id: field.to_owned(),
        label,
        target,
        span: span.into(),
    })
}

fn push_rule(doc: &mut Document, rule: Option<Rule>) {
    if let Some(rule) = rule {
        doc.rules.push(rule);
    }
}

/// Parse a whole document into `doc`, pushing rules and mappings as they are
/// recognised so a syntax error keeps everything before it.
pub(super) fn document(input: &mut Input<'_>, doc: &mut Document) -> ModalResult<()> {
    loop {
        ws.parse_next(input)?;
        if input.eof_offset() == 0 {
            return Ok(());
        }
        if header(input, "SCHEMA")? {
            let location = cut_err(quoted).context(expected("schema location")).parse_next(input)?;
            let kind = opt(delimited((ws, '('), (ws, ident, ws), ')'))
                .parse_next(input)?
                .map_or("REDCAP", |(_, k, _)| k);
            doc.schema = Some(SchemaRef {
                location,
                kind: kind.to_owned(),
            });
        } else if header(input, "SERVER")? {
            doc.server = Some(cut_err(alt((quoted, token.map(str::to_owned)))).parse_next(input)?);
        } else if header(input, "ALIASES")? {
            cut_err('{').parse_next(input)?;
            loop {
                ws.parse_next(input)?;
                if opt('}').parse_next(input)?.is_some() {
                    break;
                }
                let (name, target) = cut_err(alias).parse_next(input)?;
                doc.aliases.insert(name, target);
                let _ = opt((ws, ',')).parse_next(input)?;
            }
        } else if header(input, "RULES")? {
            cut_err('{').parse_next(input)?;
            loop {
                ws.parse_next(input)?;
                if opt('}').parse_next(input)?.is_some() {
                    break;
                }
                let r = cut_err(rule).parse_next(input)?;
                push_rule(doc, r);
            }
        } else if header(input, "MAPPINGS")? {
            doc.mappings_section_present = true;
            cut_err('{').parse_next(input)?;
            loop {
                ws.parse_next(input)?;
                if opt('}').parse_next(input)?.is_some() {
                    break;
                }
                let m = cut_err(mapping).parse_next(input)?;
                doc.mappings.insert(m.field_id.clone(), m);
            }
        } else {
            let r = cut_err(rule).parse_next(input)?;
            push_rule(doc, r);
        }
    }
}
