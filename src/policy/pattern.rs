//! Glob and address-prefix matching for policy targets.

use std::net::IpAddr;

use crate::error::{GatekeeperError, Result};

/// A compiled glob: `*` matches any sequence, `?` matches one character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    raw: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyMany,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(GatekeeperError::pattern(pattern, "pattern is empty"));
        }

        let mut tokens = Vec::with_capacity(pattern.len());
        for c in pattern.chars() {
            match c {
                '*' => {
                    // Collapse runs of '*'
                    if tokens.last() != Some(&Token::AnyMany) {
                        tokens.push(Token::AnyMany);
                    }
                }
                '?' => tokens.push(Token::AnyOne),
                '[' | ']' | '{' | '}' => {
                    return Err(GatekeeperError::pattern(
                        pattern,
                        format!("unsupported glob syntax '{}'", c),
                    ));
                }
                c if c.is_whitespace() || c.is_control() => {
                    return Err(GatekeeperError::pattern(
                        pattern,
                        "whitespace and control characters are not allowed",
                    ));
                }
                c => tokens.push(Token::Literal(c)),
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, input: &str) -> bool {
        let text: Vec<char> = input.chars().collect();
        let (mut t, mut p) = (0usize, 0usize);
        // Position of the last '*' and the text index it was tried at
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::AnyMany) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(Token::AnyOne) => {
                    p += 1;
                    t += 1;
                }
                Some(Token::Literal(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                }
                _ => match backtrack {
                    Some((star_p, star_t)) => {
                        p = star_p + 1;
                        t = star_t + 1;
                        backtrack = Some((star_p, star_t + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens[p..].iter().all(|tok| *tok == Token::AnyMany)
    }
}

/// Matcher for origin policies: an exact address or a CIDR prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginMatcher {
    Exact(String),
    Prefix { network: IpAddr, prefix_len: u8 },
}

impl OriginMatcher {
    pub fn compile(value: &str) -> Result<Self> {
        let Some((addr, len)) = value.split_once('/') else {
            return Ok(OriginMatcher::Exact(value.to_string()));
        };

        let network: IpAddr = addr
            .parse()
            .map_err(|_| GatekeeperError::pattern(value, "invalid network address"))?;
        let prefix_len: u8 = len
            .parse()
            .map_err(|_| GatekeeperError::pattern(value, "invalid prefix length"))?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(GatekeeperError::pattern(value, "prefix length out of range"));
        }

        Ok(OriginMatcher::Prefix {
            network,
            prefix_len,
        })
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            OriginMatcher::Exact(value) => value == origin,
            OriginMatcher::Prefix {
                network,
                prefix_len,
            } => match (network, origin.parse::<IpAddr>()) {
                (IpAddr::V4(net), Ok(IpAddr::V4(addr))) => {
                    prefix_eq(u32::from(*net) as u128, u32::from(addr) as u128, *prefix_len, 32)
                }
                (IpAddr::V6(net), Ok(IpAddr::V6(addr))) => {
                    prefix_eq(u128::from(*net), u128::from(addr), *prefix_len, 128)
                }
                _ => false,
            },
        }
    }
}

fn prefix_eq(network: u128, addr: u128, prefix_len: u8, width: u32) -> bool {
    if prefix_len == 0 {
        return true;
    }
    let shift = width - prefix_len as u32;
    (network >> shift) == (addr >> shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_literal() {
        let p = GlobPattern::compile("/api/users").unwrap();
        assert!(p.matches("/api/users"));
        assert!(!p.matches("/api/users/1"));
        assert!(!p.matches("/api/user"));
    }

    #[test]
    fn test_glob_star_matches_any_sequence() {
        let p = GlobPattern::compile("/api/*").unwrap();
        assert!(p.matches("/api/"));
        assert!(p.matches("/api/users"));
        assert!(p.matches("/api/users/42/orders"));
        assert!(!p.matches("/health"));

        let p = GlobPattern::compile("/api/*/orders").unwrap();
        assert!(p.matches("/api/users/42/orders"));
        assert!(!p.matches("/api/users/42/orders/1"));

        let p = GlobPattern::compile("*").unwrap();
        assert!(p.matches(""));
        assert!(p.matches("anything"));
    }

    #[test]
    fn test_glob_question_mark() {
        let p = GlobPattern::compile("/v?/items").unwrap();
        assert!(p.matches("/v1/items"));
        assert!(!p.matches("/v10/items"));
    }

    #[test]
    fn test_glob_backtracking() {
        let p = GlobPattern::compile("*ab*ab").unwrap();
        assert!(p.matches("xxabyyab"));
        assert!(p.matches("abab"));
        assert!(!p.matches("abxa"));
    }

    #[test]
    fn test_glob_rejects_malformed() {
        assert!(GlobPattern::compile("").is_err());
        assert!(GlobPattern::compile("/api/[a-z]").is_err());
        assert!(GlobPattern::compile("/api/{a,b}").is_err());
        assert!(GlobPattern::compile("/api/ users").is_err());
    }

    #[test]
    fn test_origin_exact() {
        let m = OriginMatcher::compile("10.0.0.1").unwrap();
        assert!(m.matches("10.0.0.1"));
        assert!(!m.matches("10.0.0.2"));
    }

    #[test]
    fn test_origin_cidr_prefix() {
        let m = OriginMatcher::compile("10.0.0.0/8").unwrap();
        assert!(m.matches("10.200.3.4"));
        assert!(!m.matches("11.0.0.1"));
        assert!(!m.matches("not-an-ip"));

        let m = OriginMatcher::compile("2001:db8::/32").unwrap();
        assert!(m.matches("2001:db8::1"));
        assert!(!m.matches("2001:db9::1"));
        assert!(!m.matches("10.0.0.1"));

        let m = OriginMatcher::compile("0.0.0.0/0").unwrap();
        assert!(m.matches("192.168.1.1"));
    }

    #[test]
    fn test_origin_rejects_malformed() {
        assert!(OriginMatcher::compile("10.0.0.0/33").is_err());
        assert!(OriginMatcher::compile("nope/8").is_err());
        assert!(OriginMatcher::compile("10.0.0.0/x").is_err());
    }
}
