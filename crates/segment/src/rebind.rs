//! Positional placeholder rebinding
//!
//! Rewrites `$k` placeholders to `$(k + offset - 1)` so a compiled predicate
//! can be embedded in a query that already binds its own leading arguments.
//! The transform is purely textual; quoted literals and dollar-quoted strings
//! pass through untouched.

/// Rewrite every `$k` placeholder outside of string literals.
///
/// With `offset == 1` the template is returned unchanged.
pub fn rebind(sql: &str, offset: usize) -> String {
    if offset <= 1 {
        return sql.to_string();
    }

    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut i = 0;
    let mut in_quote = false;
    let mut in_dollar_quote = false;

    while i < chars.len() {
        let c = chars[i];

        if in_quote {
            out.push(c);
            if c == '\'' {
                // '' is an escaped quote inside the literal
                if chars.get(i + 1) == Some(&'\'') {
                    out.push('\'');
                    i += 1;
                } else {
                    in_quote = false;
                }
            }
            i += 1;
            continue;
        }

        if in_dollar_quote {
            out.push(c);
            if c == '$' && chars.get(i + 1) == Some(&'$') {
                out.push('$');
                i += 1;
                in_dollar_quote = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' => {
                in_quote = true;
                out.push(c);
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'$') => {
                in_dollar_quote = true;
                out.push_str("$$");
                i += 2;
            }
            '$' if chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                let start = i + 1;
                let mut end = start;
                while chars.get(end).is_some_and(char::is_ascii_digit) {
                    end += 1;
                }
                let digits: String = chars[start..end].iter().collect();
                // the digit run is bounded, so this cannot overflow in practice
                let k: usize = digits.parse().unwrap_or(0);
                out.push('$');
                out.push_str(&(k + offset - 1).to_string());
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_one_is_identity() {
        let sql = "lower(country) = lower($1) AND orders > $2";
        assert_eq!(rebind(sql, 1), sql);
    }

    #[test]
    fn placeholders_shift_by_offset_minus_one() {
        assert_eq!(
            rebind("a = $1 AND b = $2", 3),
            "a = $3 AND b = $4"
        );
    }

    #[test]
    fn multi_digit_placeholders_shift() {
        assert_eq!(rebind("x = $10 OR y = $11", 5), "x = $14 OR y = $15");
    }

    #[test]
    fn quoted_literals_are_untouched() {
        assert_eq!(
            rebind("name = '$1' AND id = $1", 2),
            "name = '$1' AND id = $2"
        );
        assert_eq!(
            rebind("note = 'it''s $1' AND id = $1", 4),
            "note = 'it''s $1' AND id = $4"
        );
    }

    #[test]
    fn dollar_quoted_strings_are_untouched() {
        assert_eq!(
            rebind("body = $$costs $1$$ AND id = $1", 2),
            "body = $$costs $1$$ AND id = $2"
        );
    }

    #[test]
    fn bare_dollar_is_left_alone() {
        assert_eq!(rebind("price = '5' || '$'", 2), "price = '5' || '$'");
        assert_eq!(rebind("tail$", 2), "tail$");
    }
}
