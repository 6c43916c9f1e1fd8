/// Split one CSV line into its fields.
///
/// Quotes toggle quoted mode and are never emitted; inside quotes `,` is literal and `""`
/// yields a single `"`. An unterminated quote is tolerated: whatever has been collected is
/// still returned. The last field is always emitted, so `a,` gives `["a", ""]`.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match (in_quotes, ch) {
            (true, '"') => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cur.push('"');
                } else {
                    in_quotes = false;
                }
            }
            (false, '"') => in_quotes = true,
            (false, ',') => fields.push(std::mem::take(&mut cur)),
            (_, c) => cur.push(c),
        }
    }

    fields.push(cur);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requote(field: &str) -> String {
        if field.contains(',') || field.contains('"') {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    #[test]
    fn plain_fields() {
        assert_eq!(tokenize("2020,1,Acme,10"), vec!["2020", "1", "Acme", "10"]);
    }

    #[test]
    fn trailing_comma_yields_empty_field() {
        assert_eq!(tokenize("a,b,"), vec!["a", "b", ""]);
        assert_eq!(tokenize(""), vec![""]);
    }

    #[test]
    fn quoted_commas_and_escaped_quotes() {
        assert_eq!(
            tokenize(r#"2020,"SOUTHERN GLAZERS, INC","say ""hi""",3"#),
            vec!["2020", "SOUTHERN GLAZERS, INC", r#"say "hi""#, "3"]
        );
    }

    #[test]
    fn bare_quote_toggles_without_being_emitted() {
        assert_eq!(tokenize(r#"ab"c,d"e"#), vec!["abc,de"]);
    }

    #[test]
    fn unterminated_quote_is_best_effort() {
        assert_eq!(tokenize(r#"1,"open, never closed"#), vec!["1", "open, never closed"]);
    }

    #[test]
    fn tokenizing_is_idempotent() {
        let line = r#"x,"y, z","",w"#;
        assert_eq!(tokenize(line), tokenize(line));
    }

    #[test]
    fn requoted_fields_round_trip() {
        let lines = [
            r#"2017,10,"ROYAL WINE CORP, LLC",0.83,0,1"#,
            "a,,c",
            r#""quoted ""inner""",plain"#,
        ];
        for line in lines {
            let fields = tokenize(line);
            let joined = fields.iter().map(|f| requote(f)).collect::<Vec<_>>().join(",");
            assert_eq!(tokenize(&joined), fields, "line {line:?}");
        }
    }

    #[test]
    fn multibyte_characters_survive() {
        assert_eq!(tokenize("Café,naïve,日本"), vec!["Café", "naïve", "日本"]);
    }
}
