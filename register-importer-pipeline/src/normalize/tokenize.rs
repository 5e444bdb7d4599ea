//! Bracket-aware splitting of list-valued fields.

/// Split a list-valued field on `delimiter`, ignoring delimiters inside
/// round or square brackets. Bracketed sub-clauses are part of their token
/// and kept verbatim, however deep they nest. `" / "` collapses to `"/"`
/// so a spaced slash is not mistaken for two values. Empty tokens are
/// dropped.
pub fn split_list(input: &str, delimiter: char) -> Vec<String> {
    let cleaned = input.replace(" / ", "/");
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth: u32 = 0;
    for c in cleaned.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            _ if c == delimiter && depth == 0 => {
                push_token(&mut tokens, &mut current);
            }
            _ => current.push(c),
        }
    }
    push_token(&mut tokens, &mut current);
    tokens
}

fn push_token(tokens: &mut Vec<String>, current: &mut String) {
    let token = current.trim();
    if !token.is_empty() {
        tokens.push(token.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_top_level_delimiters_only() {
        assert_eq!(
            split_list(
                "Education; Health (excluding [mental health]); Housing",
                ';'
            ),
            vec![
                "Education",
                "Health (excluding [mental health])",
                "Housing"
            ]
        );
    }

    #[test]
    fn comma_lists_with_bracketed_commas() {
        assert_eq!(
            split_list("The advancement of religion, Relief of those in need (age, ill-health, disability)", ','),
            vec![
                "The advancement of religion",
                "Relief of those in need (age, ill-health, disability)"
            ]
        );
    }

    #[test]
    fn spaced_slash_collapses() {
        assert_eq!(
            split_list("Arts / Culture, Sport", ','),
            vec!["Arts/Culture", "Sport"]
        );
    }

    #[test]
    fn empty_tokens_are_dropped() {
        assert_eq!(split_list(";; Education ;", ';'), vec!["Education"]);
        assert!(split_list("   ", ';').is_empty());
    }

    #[test]
    fn unbalanced_closes_do_not_underflow() {
        assert_eq!(
            split_list("a), b", ','),
            vec!["a)", "b"]
        );
    }
}
