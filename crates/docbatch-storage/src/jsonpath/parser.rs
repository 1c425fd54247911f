//! nom parser for path predicates.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{anychar, char, digit1, multispace0, none_of, satisfy},
    combinator::{all_consuming, map, map_res, not, peek, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, many0_count},
    number::complete::double,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::{Number, Value};

use super::{Accessor, CmpOp, Operand, Path, Predicate};

// ============ Helper Parsers ============

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_ident_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

/// Wraps a parser with optional surrounding whitespace.
fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// A keyword not followed by an identifier character.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(peek(satisfy(is_ident_char))))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(input)
}

/// JSON string literal, decoded.
fn string_literal(input: &str) -> IResult<&str, String> {
    map_res(
        recognize(delimited(
            char('"'),
            many0(alt((
                recognize(pair(char('\\'), anychar)),
                recognize(none_of("\"\\")),
            ))),
            char('"'),
        )),
        serde_json::from_str::<String>,
    )(input)
}

fn number_literal(input: &str) -> IResult<&str, Value> {
    map_res(double, |n| {
        Number::from_f64(n).map(Value::Number).ok_or("non-finite number")
    })(input)
}

fn literal(input: &str) -> IResult<&str, Value> {
    alt((
        map(string_literal, Value::String),
        value(Value::Bool(true), keyword("true")),
        value(Value::Bool(false), keyword("false")),
        value(Value::Null, keyword("null")),
        number_literal,
    ))(input)
}

// ============ Paths ============

fn accessor(input: &str) -> IResult<&str, Accessor> {
    alt((
        value(
            Accessor::AnyElement,
            tuple((char('['), multispace0, char('*'), multispace0, char(']'))),
        ),
        map(
            delimited(
                pair(char('['), multispace0),
                map_res(digit1, str::parse::<usize>),
                pair(multispace0, char(']')),
            ),
            Accessor::Element,
        ),
        value(Accessor::AnyMember, tag(".*")),
        map(preceded(char('.'), string_literal), Accessor::Member),
        map(preceded(char('.'), identifier), |name: &str| {
            Accessor::Member(name.to_string())
        }),
    ))(input)
}

/// `$` followed by accessors. `$name` is a variable, not a path.
fn path(input: &str) -> IResult<&str, Path> {
    map(
        preceded(
            terminated(char('$'), not(peek(satisfy(is_ident_char)))),
            many0(accessor),
        ),
        |accessors| Path { accessors },
    )(input)
}

fn variable(input: &str) -> IResult<&str, String> {
    map(preceded(char('$'), take_while1(is_ident_char)), String::from)(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    ws(alt((
        map(path, Operand::Path),
        map(variable, Operand::Variable),
        map(literal, Operand::Literal),
    )))(input)
}

fn cmp_op(input: &str) -> IResult<&str, CmpOp> {
    ws(alt((
        value(CmpOp::Eq, tag("==")),
        value(CmpOp::Ne, tag("!=")),
        value(CmpOp::Ne, tag("<>")),
        value(CmpOp::Le, tag("<=")),
        value(CmpOp::Ge, tag(">=")),
        value(CmpOp::Lt, tag("<")),
        value(CmpOp::Gt, tag(">")),
    )))(input)
}

// ============ Predicates ============

fn comparison(input: &str) -> IResult<&str, Predicate> {
    let (rest, lhs) = operand(input)?;
    if let Ok((rest, (op, rhs))) = pair(cmp_op, operand)(rest) {
        return Ok((rest, Predicate::Compare(lhs, op, rhs)));
    }
    match lhs {
        Operand::Path(path) => Ok((rest, Predicate::PathValue(path))),
        Operand::Literal(Value::Bool(b)) => Ok((rest, Predicate::Literal(b))),
        _ => Err(nom::Err::Error(Error::new(input, ErrorKind::Verify))),
    }
}

fn exists(input: &str) -> IResult<&str, Predicate> {
    map(
        preceded(
            pair(keyword("exists"), multispace0),
            delimited(char('('), ws(path), char(')')),
        ),
        Predicate::Exists,
    )(input)
}

/// Parenthesized groups and `!` prefixes allowed around one comparison.
pub(crate) const MAX_NESTING: usize = 64;

fn too_deep(input: &str) -> nom::Err<Error<&str>> {
    nom::Err::Failure(Error::new(input, ErrorKind::TooLarge))
}

fn group(input: &str, depth: usize) -> IResult<&str, Predicate> {
    let (rest, _) = char('(')(input)?;
    if depth >= MAX_NESTING {
        return Err(too_deep(input));
    }
    terminated(|i| or_expr(i, depth + 1), char(')'))(rest)
}

fn primary(input: &str, depth: usize) -> IResult<&str, Predicate> {
    ws(alt((|i| group(i, depth), exists, comparison)))(input)
}

fn unary(input: &str, depth: usize) -> IResult<&str, Predicate> {
    let (rest, negations) = many0_count(ws(char('!')))(input)?;
    let depth = depth + negations;
    if depth > MAX_NESTING {
        return Err(too_deep(input));
    }
    let (rest, inner) = primary(rest, depth)?;
    let negated = (0..negations).fold(inner, |acc, _| Predicate::Not(Box::new(acc)));
    Ok((rest, negated))
}

/// Joins operands pairwise, level by level, so a long `&&`/`||` chain
/// nests logarithmically. Both connectives are associative in three-valued
/// logic, so the grouping does not change the result.
fn balanced(
    first: Predicate,
    rest: Vec<Predicate>,
    join: fn(Box<Predicate>, Box<Predicate>) -> Predicate,
) -> Predicate {
    let mut terms: Vec<Predicate> = std::iter::once(first).chain(rest).collect();
    loop {
        terms = match <[Predicate; 1]>::try_from(terms) {
            Ok([only]) => return only,
            Err(terms) => {
                let mut next = Vec::with_capacity(terms.len().div_ceil(2));
                let mut iter = terms.into_iter();
                while let Some(lhs) = iter.next() {
                    next.push(match iter.next() {
                        Some(rhs) => join(Box::new(lhs), Box::new(rhs)),
                        None => lhs,
                    });
                }
                next
            }
        };
    }
}

fn and_expr(input: &str, depth: usize) -> IResult<&str, Predicate> {
    let (input, first) = unary(input, depth)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), |i| unary(i, depth)))(input)?;
    Ok((input, balanced(first, rest, Predicate::And)))
}

fn or_expr(input: &str, depth: usize) -> IResult<&str, Predicate> {
    let (input, first) = and_expr(input, depth)?;
    let (input, rest) = many0(preceded(ws(tag("||")), |i| and_expr(i, depth)))(input)?;
    Ok((input, balanced(first, rest, Predicate::Or)))
}

/// Parses a complete predicate, reporting the byte offset of the first
/// unparsed input on failure.
pub(crate) fn parse_predicate(input: &str) -> Result<Predicate, String> {
    match all_consuming(ws(|i| or_expr(i, 0)))(input) {
        Ok((_, predicate)) => Ok(predicate),
        Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => Err(format!(
            "nesting deeper than {MAX_NESTING} levels at position {}",
            input.len() - e.input.len()
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(format!(
            "unexpected input at position {}",
            input.len() - e.input.len()
        )),
        Err(nom::Err::Incomplete(_)) => Err("incomplete input".to_string()),
    }
}
