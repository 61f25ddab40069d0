//! PII masking engine
//!
//! Columns are classified once from their header by case-insensitive keyword
//! substring match. Categories are tried in a fixed order (email, phone, id,
//! name, address) and the first hit wins, so `email_address` is an email
//! column. Every cell of a classified column is then masked on its own.
//!
//! All masking works on characters, not bytes.

use serde::{Deserialize, Serialize};

/// Character substituted for hidden content
pub const MASK_CHAR: char = '*';

/// Fixed mask replacing the hidden part of an email local part
const EMAIL_LOCAL_MASK: &str = "***";

const EMAIL_KEYWORDS: &[&str] = &["email", "e-mail", "mail", "邮箱"];
const PHONE_KEYWORDS: &[&str] = &["phone", "mobile", "tel", "telephone", "手机号", "电话"];
const ID_KEYWORDS: &[&str] = &["id_card", "idcard", "identity", "ssn", "passport", "身份证", "证件"];
const NAME_KEYWORDS: &[&str] = &["name", "full_name", "first_name", "last_name", "姓名"];
const ADDRESS_KEYWORDS: &[&str] = &["address", "addr", "地址"];

/// Sensitive column category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskKind {
    Email,
    Phone,
    GovernmentId,
    PersonalName,
    Address,
}

impl MaskKind {
    /// Classification precedence
    const PRECEDENCE: [(MaskKind, &'static [&'static str]); 5] = [
        (MaskKind::Email, EMAIL_KEYWORDS),
        (MaskKind::Phone, PHONE_KEYWORDS),
        (MaskKind::GovernmentId, ID_KEYWORDS),
        (MaskKind::PersonalName, NAME_KEYWORDS),
        (MaskKind::Address, ADDRESS_KEYWORDS),
    ];
}

/// Classify a column header, `None` means the column passes through
pub fn classify(header: &str) -> Option<MaskKind> {
    let normalized = header.trim().to_lowercase();
    MaskKind::PRECEDENCE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| normalized.contains(k)))
        .map(|(kind, _)| *kind)
}

/// Mask a value according to its column category.
///
/// Empty values stay empty whatever the category.
pub fn mask(value: &str, kind: MaskKind) -> String {
    if value.is_empty() {
        return String::new();
    }
    match kind {
        MaskKind::Email => mask_email(value),
        MaskKind::Phone => mask_phone(value),
        MaskKind::GovernmentId => keep_edges(value, 2, 2, 4),
        MaskKind::PersonalName => keep_edges(value, 1, 0, 1),
        MaskKind::Address => keep_edges(value, 6, 0, 6),
    }
}

/// Fallback masking: keep first and last character
pub fn mask_generic(value: &str) -> String {
    keep_edges(value, 1, 1, 2)
}

fn mask_email(value: &str) -> String {
    let Some((local, domain)) = value.split_once('@') else {
        return mask_generic(value);
    };
    match local.chars().next() {
        Some(first) => format!("{}{}@{}", first, EMAIL_LOCAL_MASK, domain),
        None => format!("{}@{}", EMAIL_LOCAL_MASK, domain),
    }
}

fn mask_phone(value: &str) -> String {
    let digits = value.chars().filter(|c| c.is_numeric()).count();
    if digits == 0 {
        return mask_generic(value);
    }

    // Numbers of four digits or fewer are hidden entirely
    let keep = if digits > 4 { 4 } else { 0 };
    let mut seen = 0;
    value
        .chars()
        .map(|c| {
            if !c.is_numeric() {
                return c;
            }
            seen += 1;
            if digits - seen < keep {
                c
            } else {
                MASK_CHAR
            }
        })
        .collect()
}

/// Keep `head` leading and `tail` trailing characters and mask the rest;
/// values of `full_mask_len` characters or fewer are masked completely
fn keep_edges(value: &str, head: usize, tail: usize, full_mask_len: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len();
    if len <= full_mask_len {
        return MASK_CHAR.to_string().repeat(len);
    }

    let mut out = String::with_capacity(value.len());
    out.extend(&chars[..head]);
    out.extend(std::iter::repeat(MASK_CHAR).take(len - head - tail));
    out.extend(&chars[len - tail..]);
    out
}

// ============================================================================
// Column Rules
// ============================================================================

/// Per-column masking rules derived once from a header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRules {
    rules: Vec<Option<MaskKind>>,
}

impl ColumnRules {
    pub fn from_header<S: AsRef<str>>(header: &[S]) -> Self {
        Self {
            rules: header.iter().map(|h| classify(h.as_ref())).collect(),
        }
    }

    pub fn rules(&self) -> &[Option<MaskKind>] {
        &self.rules
    }

    /// Number of columns that will be masked
    pub fn masked_columns(&self) -> usize {
        self.rules.iter().filter(|r| r.is_some()).count()
    }

    /// Mask one data row. Cells beyond the header pass through unchanged;
    /// a short row simply yields fewer cells.
    pub fn apply<S: AsRef<str>>(&self, row: &[S]) -> Vec<String> {
        row.iter()
            .enumerate()
            .map(|(i, cell)| {
                let cell = cell.as_ref();
                match self.rules.get(i).copied().flatten() {
                    Some(kind) => mask(cell, kind),
                    None => cell.to_string(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_precedence() {
        assert_eq!(classify("Email"), Some(MaskKind::Email));
        assert_eq!(classify("email_address"), Some(MaskKind::Email));
        assert_eq!(classify("Mobile Phone"), Some(MaskKind::Phone));
        assert_eq!(classify("passport_no"), Some(MaskKind::GovernmentId));
        assert_eq!(classify(" Full_Name "), Some(MaskKind::PersonalName));
        assert_eq!(classify("home addr"), Some(MaskKind::Address));
        assert_eq!(classify("手机号"), Some(MaskKind::Phone));
        assert_eq!(classify("amount"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn test_mask_phone_preserves_punctuation() {
        assert_eq!(mask("138-1234-5678", MaskKind::Phone), "***-****-5678");
        assert_eq!(mask("+1 (555) 010-9999", MaskKind::Phone), "+* (***) ***-9999");
        assert_eq!(mask("1234", MaskKind::Phone), "****");
        assert_eq!(mask("n/a", MaskKind::Phone), "n*a");
    }

    #[test]
    fn test_mask_phone_full_width_digits() {
        assert_eq!(mask("１３８-１２３４-５６７８", MaskKind::Phone), "***-****-５６７８");
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask("alice@example.com", MaskKind::Email), "a***@example.com");
        assert_eq!(mask("@example.com", MaskKind::Email), "***@example.com");
        assert_eq!(mask("not-an-email", MaskKind::Email), "n**********l");
    }

    #[test]
    fn test_mask_fixed_edges() {
        assert_eq!(mask("110101199001011234", MaskKind::GovernmentId), "11**************34");
        assert_eq!(mask("1234", MaskKind::GovernmentId), "****");
        assert_eq!(mask("Alice", MaskKind::PersonalName), "A****");
        assert_eq!(mask("A", MaskKind::PersonalName), "*");
        assert_eq!(mask("张三丰", MaskKind::PersonalName), "张**");
        assert_eq!(mask("221B Baker Street", MaskKind::Address), "221B B***********");
        assert_eq!(mask("Baker", MaskKind::Address), "*****");
        assert_eq!(mask_generic("ab"), "**");
        assert_eq!(mask_generic("abc"), "a*c");
    }

    #[test]
    fn test_empty_values_stay_empty() {
        for kind in [
            MaskKind::Email,
            MaskKind::Phone,
            MaskKind::GovernmentId,
            MaskKind::PersonalName,
            MaskKind::Address,
        ] {
            assert_eq!(mask("", kind), "");
        }
    }

    #[test]
    fn test_masking_twice_keeps_masked_positions() {
        let samples = [
            ("138-1234-5678", MaskKind::Phone),
            ("110101199001011234", MaskKind::GovernmentId),
            ("Alice", MaskKind::PersonalName),
            ("221B Baker Street", MaskKind::Address),
        ];
        for (value, kind) in samples {
            let once = mask(value, kind);
            let twice = mask(&once, kind);
            for (a, b) in once.chars().zip(twice.chars()) {
                if a == MASK_CHAR {
                    assert_eq!(b, MASK_CHAR, "{value}: {once} -> {twice}");
                }
            }
        }
    }

    #[test]
    fn test_column_rules_tolerate_ragged_rows() {
        let rules = ColumnRules::from_header(&["name", "phone", "city"]);
        assert_eq!(rules.masked_columns(), 2);

        assert_eq!(rules.apply(&["Alice"]), vec!["A****"]);
        assert_eq!(
            rules.apply(&["Bob", "13812345678", "Paris", "extra"]),
            vec!["B**", "*******5678", "Paris", "extra"]
        );
    }
}
