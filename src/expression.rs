//! Constant folding of integer expressions
//!
//! Used for enumerator values, interface ids, array sizes and buffer length
//! expressions. Anything that is not a compile-time integer yields `None`.

use crate::types::Fundamental;

/// Evaluates `tokens`, asking `resolve` for the value of identifiers.
pub fn evaluate(tokens: &[String], resolve: &dyn Fn(&str) -> Option<i64>) -> Option<i64> {
    if tokens.is_empty() {
        return None;
    }
    let mut evaluator = Evaluator {
        tokens,
        position: 0,
        resolve,
    };
    let value = evaluator.bit_or()?;
    if evaluator.position == tokens.len() {
        Some(value)
    } else {
        None
    }
}

/// Parses an integer literal (decimal, hex, octal or binary, with digit
/// separators and `u`/`l` suffixes).
pub fn parse_integer(literal: &str) -> Option<i64> {
    let cleaned: String = literal
        .trim_end_matches(['u', 'U', 'l', 'L'])
        .chars()
        .filter(|&c| c != '\'')
        .collect();
    let (digits, radix) = if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        (hex, 16)
    } else if let Some(bin) = cleaned.strip_prefix("0b").or_else(|| cleaned.strip_prefix("0B")) {
        (bin, 2)
    } else if cleaned.len() > 1 && cleaned.starts_with('0') {
        (&cleaned[1..], 8)
    } else {
        (cleaned.as_str(), 10)
    };
    u64::from_str_radix(digits, radix).ok().map(|v| v as i64)
}

struct Evaluator<'a> {
    tokens: &'a [String],
    position: usize,
    resolve: &'a dyn Fn(&str) -> Option<i64>,
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.position).map(String::as_str)
    }

    fn peek_at(&self, offset: usize) -> Option<&str> {
        self.tokens.get(self.position + offset).map(String::as_str)
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.peek() == Some(token) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn bit_or(&mut self) -> Option<i64> {
        let mut value = self.bit_xor()?;
        while self.eat("|") {
            value |= self.bit_xor()?;
        }
        Some(value)
    }

    fn bit_xor(&mut self) -> Option<i64> {
        let mut value = self.bit_and()?;
        while self.eat("^") {
            value ^= self.bit_and()?;
        }
        Some(value)
    }

    fn bit_and(&mut self) -> Option<i64> {
        let mut value = self.shift()?;
        while self.eat("&") {
            value &= self.shift()?;
        }
        Some(value)
    }

    fn shift(&mut self) -> Option<i64> {
        let mut value = self.additive()?;
        loop {
            if self.eat("<<") {
                let rhs = self.additive()?;
                value = value.checked_shl(u32::try_from(rhs).ok()?)?;
            } else if self.peek() == Some(">") && self.peek_at(1) == Some(">") {
                // the lexer never joins '>' '>' so template closers stay intact
                self.position += 2;
                let rhs = self.additive()?;
                value = value.checked_shr(u32::try_from(rhs).ok()?)?;
            } else {
                return Some(value);
            }
        }
    }

    fn additive(&mut self) -> Option<i64> {
        let mut value = self.multiplicative()?;
        loop {
            if self.eat("+") {
                value = value.checked_add(self.multiplicative()?)?;
            } else if self.eat("-") {
                value = value.checked_sub(self.multiplicative()?)?;
            } else {
                return Some(value);
            }
        }
    }

    fn multiplicative(&mut self) -> Option<i64> {
        let mut value = self.unary()?;
        loop {
            if self.eat("*") {
                value = value.checked_mul(self.unary()?)?;
            } else if self.eat("/") {
                value = value.checked_div(self.unary()?)?;
            } else if self.eat("%") {
                value = value.checked_rem(self.unary()?)?;
            } else {
                return Some(value);
            }
        }
    }

    fn unary(&mut self) -> Option<i64> {
        if self.eat("-") {
            return self.unary()?.checked_neg();
        }
        if self.eat("+") {
            return self.unary();
        }
        if self.eat("~") {
            return Some(!self.unary()?);
        }
        if self.eat("!") {
            return Some((self.unary()? == 0) as i64);
        }
        self.primary()
    }

    fn primary(&mut self) -> Option<i64> {
        let token = self.peek()?.to_string();
        self.position += 1;

        if token == "(" {
            let value = self.bit_or()?;
            return self.eat(")").then_some(value);
        }
        if token == "sizeof" {
            return self.size_of();
        }
        if token.starts_with(|c: char| c.is_ascii_digit()) {
            return parse_integer(&token);
        }
        if token.starts_with(|c: char| c.is_alphabetic() || c == '_') || token == "::" {
            let mut name = token;
            while self.peek() == Some("::") {
                name.push_str("::");
                self.position += 1;
                name.push_str(self.peek()?);
                self.position += 1;
            }
            return (self.resolve)(&name);
        }
        None
    }

    fn size_of(&mut self) -> Option<i64> {
        if !self.eat("(") {
            return None;
        }
        let mut words = Vec::new();
        while let Some(token) = self.peek() {
            if token == ")" {
                break;
            }
            words.push(token.to_string());
            self.position += 1;
        }
        if !self.eat(")") {
            return None;
        }
        let fundamental = match words.as_slice() {
            [single] => Fundamental::from_name(single),
            _ => {
                let unsigned = words.iter().any(|w| w == "unsigned");
                let signed = words.iter().any(|w| w == "signed");
                let shorts = words.iter().filter(|w| *w == "short").count();
                let longs = words.iter().filter(|w| *w == "long").count();
                let base = words
                    .iter()
                    .find(|w| {
                        !matches!(w.as_str(), "unsigned" | "signed" | "short" | "long" | "const")
                    })
                    .map(String::as_str);
                Fundamental::from_specifiers(unsigned, signed, shorts, longs, base)
            }
        }?;
        Some(i64::from(fundamental.size() / 8))
    }
}
