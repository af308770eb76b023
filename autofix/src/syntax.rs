//! Syntax checking for candidate `fixed_code` before it is submitted to the
//! sandbox. The core has no embedded language parser, so per the decided
//! open question in `DESIGN.md` this validates balanced delimiters and
//! consistent indentation after dedent, rather than building a real AST.
//! A candidate that fails this check is rejected before sandboxing.

/// `true` if `code`, after stripping common leading whitespace, has
/// balanced brackets/quotes and does not mix tabs and spaces within a
/// single indentation run.
pub fn syntax_check(code: &str) -> bool {
    let dedented = dedent(code);
    balanced_delimiters(&dedented) && consistent_indentation(&dedented)
}

/// Strip the minimum common leading whitespace from every non-blank line,
/// matching the source's "AST parse after dedent" preprocessing step.
pub fn dedent(code: &str) -> String {
    let min_indent = code
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    code.lines()
        .map(|line| if line.len() >= min_indent { &line[min_indent..] } else { line.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
}

fn balanced_delimiters(code: &str) -> bool {
    let mut stack = Vec::new();
    let mut chars = code.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(quote) = in_string {
            if ch == '\\' {
                chars.next();
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' => in_string = Some(ch),
            '#' => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => stack.push(ch),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }

    stack.is_empty() && in_string.is_none()
}

fn consistent_indentation(code: &str) -> bool {
    for line in code.lines() {
        let leading: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        if leading.contains(' ') && leading.contains('\t') {
            return false;
        }
    }
    true
}
