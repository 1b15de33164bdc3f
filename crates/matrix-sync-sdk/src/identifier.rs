//! Matrix 标识符
//!
//! 标识符由三部分组成：sigil、localpart 和 domain，规范形式为
//! `{sigil}{localpart}:{domain}`。相等与哈希都只看规范字符串。

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SdkError;

/// 标识符前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sigil {
    /// `@` 用户
    User,
    /// `!` 房间
    Room,
    /// `$` 事件
    Event,
    /// `+` 群组
    Group,
    /// `#` 房间别名
    Alias,
}

impl Sigil {
    pub fn as_char(self) -> char {
        match self {
            Sigil::User => '@',
            Sigil::Room => '!',
            Sigil::Event => '$',
            Sigil::Group => '+',
            Sigil::Alias => '#',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '@' => Some(Sigil::User),
            '!' => Some(Sigil::Room),
            '$' => Some(Sigil::Event),
            '+' => Some(Sigil::Group),
            '#' => Some(Sigil::Alias),
            _ => None,
        }
    }
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<localpart>[a-zA-Z0-9._=\-/]{1,255}):(?P<domain>.+)$")
            .expect("identifier regex is valid")
    })
}

/// 不可变标识符，克隆开销为一次引用计数
#[derive(Clone)]
pub struct Identifier {
    sigil: Sigil,
    /// 规范字符串
    canonical: Arc<str>,
    /// localpart 结束位置（即第一个 ':' 的下标）
    colon: usize,
}

impl Identifier {
    /// 从组成部分构造
    pub fn new(sigil: Sigil, localpart: &str, domain: &str) -> Self {
        let canonical = format!("{}{}:{}", sigil.as_char(), localpart, domain);
        Self {
            sigil,
            canonical: Arc::from(canonical),
            colon: 1 + localpart.len(),
        }
    }

    /// 解析并校验标识符
    pub fn parse(raw: &str) -> Result<Self, SdkError> {
        let mut chars = raw.chars();
        let sigil = chars
            .next()
            .and_then(Sigil::from_char)
            .ok_or_else(|| SdkError::InvalidIdentifier(format!("'{}' has invalid sigil", raw)))?;

        let rest = chars.as_str();
        let captures = identifier_regex()
            .captures(rest)
            .ok_or_else(|| SdkError::InvalidIdentifier(format!("'{}' is not a valid identifier", raw)))?;

        let localpart = &captures["localpart"];
        let domain = &captures["domain"];
        Ok(Self::new(sigil, localpart, domain))
    }

    pub fn sigil(&self) -> Sigil {
        self.sigil
    }

    pub fn localpart(&self) -> &str {
        &self.canonical[1..self.colon]
    }

    /// 分配该标识符的 homeserver 名
    pub fn domain(&self) -> &str {
        &self.canonical[self.colon + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Identifier {}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        &*self.canonical == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        &*self.canonical == *other
    }
}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.canonical)
    }
}

impl FromStr for Identifier {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identifier::parse(s)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Identifier::parse(&raw).map_err(serde::de::Error::custom)
    }
}
