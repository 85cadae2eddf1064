//! Python 源码的词法扫描，供沙箱预检使用
//!
//! 只切出标识符、运算符与逻辑换行；字符串与注释整体跳过，f-string 只扫描 `{}` 中的表达式。
//! 不做完整语法分析：import 语句、裸名字与 `.属性` 的判定都基于 token 序列。

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Op(char),
    /// 括号外的换行（逻辑行结束）
    Newline,
}

/// 扫描结果：均按源码出现顺序
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CodeScan {
    /// `import a.b` / `from a.b import c` 中的模块名；相对导入保留前导 `.`
    pub imports: Vec<String>,
    /// 不在 `.` 之后的标识符（def / class 后的定义名除外）
    pub names: Vec<String>,
    /// `.` 之后的标识符，以及 `from m import x` 中的 x
    pub attributes: Vec<String>,
}

impl CodeScan {
    pub fn of(code: &str) -> Self {
        let tokens = tokenize(code);
        let mut scan = CodeScan::default();
        let mut i = 0;
        let mut stmt_start = true;
        while i < tokens.len() {
            let starts = stmt_start;
            stmt_start = matches!(tokens[i], Token::Newline | Token::Op(';') | Token::Op(':'));
            match &tokens[i] {
                Token::Name(word) if word == "import" => {
                    i += 1;
                    loop {
                        let (module, next) = dotted(&tokens, i);
                        i = next;
                        if !module.is_empty() {
                            scan.imports.push(module);
                        }
                        if matches!(tokens.get(i), Some(Token::Name(w)) if w == "as") {
                            i += 2;
                        }
                        if matches!(tokens.get(i), Some(Token::Op(','))) {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                }
                Token::Name(word) if word == "from" && starts => {
                    let (module, next) = dotted(&tokens, i + 1);
                    scan.imports.push(module);
                    i = next;
                    if matches!(tokens.get(i), Some(Token::Name(w)) if w == "import") {
                        i += 1;
                        while let Some(token) = tokens.get(i) {
                            match token {
                                Token::Newline | Token::Op(';') => break,
                                Token::Name(w) if w == "as" => i += 1,
                                Token::Name(w) => scan.attributes.push(w.clone()),
                                Token::Op(_) => {}
                            }
                            i += 1;
                        }
                    }
                }
                Token::Name(word) => {
                    let prev = i.checked_sub(1).map(|p| &tokens[p]);
                    let after_dot = prev == Some(&Token::Op('.'));
                    let defined =
                        matches!(prev, Some(Token::Name(w)) if w == "def" || w == "class");
                    if after_dot {
                        scan.attributes.push(word.clone());
                    } else if !defined {
                        scan.names.push(word.clone());
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        scan
    }
}

/// 从 start 读 `..a.b.c`，返回 (名字, 下一个位置)
fn dotted(tokens: &[Token], start: usize) -> (String, usize) {
    let mut out = String::new();
    let mut i = start;
    while let Some(token) = tokens.get(i) {
        match token {
            Token::Op('.') => out.push('.'),
            Token::Name(w) if w != "import" && (out.is_empty() || out.ends_with('.')) => {
                out.push_str(w)
            }
            _ => break,
        }
        i += 1;
    }
    (out, i)
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_name_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// 字符串前缀（大小写不敏感）：r u b f 及其组合
fn string_prefix(word: &str) -> Option<bool> {
    let lower = word.to_ascii_lowercase();
    match lower.as_str() {
        "r" | "u" | "b" | "br" | "rb" => Some(false),
        "f" | "fr" | "rf" => Some(true),
        _ => None,
    }
}

fn tokenize(code: &str) -> Vec<Token> {
    let chars: Vec<char> = code.chars().collect();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => i += 2,
            '\n' => {
                if depth == 0 {
                    tokens.push(Token::Newline);
                }
                i += 1;
            }
            '\'' | '"' => {
                i = skip_string(&chars, i, false, &mut tokens);
            }
            '(' | '[' | '{' => {
                depth += 1;
                tokens.push(Token::Op(c));
                i += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                tokens.push(Token::Op(c));
                i += 1;
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match (chars.get(i), string_prefix(&word)) {
                    (Some('\'' | '"'), Some(formatted)) => {
                        i = skip_string(&chars, i, formatted, &mut tokens);
                    }
                    _ => tokens.push(Token::Name(word)),
                }
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (is_name_char(chars[i]) || chars[i] == '.') {
                    i += 1;
                }
            }
            c if c.is_whitespace() => i += 1,
            _ => {
                tokens.push(Token::Op(c));
                i += 1;
            }
        }
    }
    tokens
}

/// 跳过从 start（引号处）开始的字符串字面量，返回其后位置；
/// f-string 中 `{...}` 里的表达式单独切分并追加到 tokens
fn skip_string(chars: &[char], start: usize, formatted: bool, tokens: &mut Vec<Token>) -> usize {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };
    let mut expr = String::new();
    let mut braces = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if braces > 0 {
                expr.push(c);
                if let Some(next) = chars.get(i + 1) {
                    expr.push(*next);
                }
            }
            i += 2;
            continue;
        }
        if c == quote && braces == 0 {
            if !triple {
                return i + 1;
            }
            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return i + 3;
            }
        }
        if c == '\n' && !triple {
            return i;
        }
        if formatted {
            match c {
                '{' if braces == 0 && chars.get(i + 1) == Some(&'{') => {
                    i += 2;
                    continue;
                }
                '{' => {
                    braces += 1;
                    if braces > 1 {
                        expr.push(c);
                    }
                }
                '}' if braces > 0 => {
                    braces -= 1;
                    if braces == 0 {
                        tokens.extend(tokenize(&expr));
                        tokens.push(Token::Op(';'));
                        expr.clear();
                    } else {
                        expr.push(c);
                    }
                }
                _ if braces > 0 => expr.push(c),
                _ => {}
            }
        }
        i += 1;
    }
    if !expr.is_empty() {
        tokens.extend(tokenize(&expr));
    }
    chars.len()
}
