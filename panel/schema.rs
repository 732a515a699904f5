//! Canonical census fields and the per-year column layouts that feed them.
//!
//! Yearly extracts disagree on column names and codings. Each extract is
//! resolved once into a [`SnapshotLayout`] that knows which columns are present
//! and how to recode them; a field with no usable column in a given year is
//! simply not observed that year.

use crate::files::Table;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Sex,
    BirthYear,
    BirthMonth,
    WhiteBritish,
    Eal,
    IdaciDecile,
    HomeLa,
    SchoolLa,
    SchoolId,
    Siblings,
    Fsm,
    PartTime,
    Sen,
    SenAction,
    SenActionPlus,
    SenStatement,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sex => "sex",
            Self::BirthYear => "birth_year",
            Self::BirthMonth => "birth_month",
            Self::WhiteBritish => "white_british",
            Self::Eal => "eal",
            Self::IdaciDecile => "idaci_decile",
            Self::HomeLa => "home_la",
            Self::SchoolLa => "school_la",
            Self::SchoolId => "school_id",
            Self::Siblings => "nsiblings",
            Self::Fsm => "fsm",
            Self::PartTime => "part_time",
            Self::Sen => "sen",
            Self::SenAction => "sen_action",
            Self::SenActionPlus => "sen_action_plus",
            Self::SenStatement => "sen_statement",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recode {
    Text,
    Integer,
    Flag,
    Sex,
}

struct DirectRule {
    field: Field,
    aliases: &'static [&'static str],
    recode: Recode,
}

const DIRECT_RULES: &[DirectRule] = &[
    DirectRule {
        field: Field::Sex,
        aliases: &["sex", "gender"],
        recode: Recode::Sex,
    },
    DirectRule {
        field: Field::BirthYear,
        aliases: &["birth_year", "yearofbirth", "yob"],
        recode: Recode::Integer,
    },
    DirectRule {
        field: Field::BirthMonth,
        aliases: &["birth_month", "monthofbirth", "mob"],
        recode: Recode::Integer,
    },
    DirectRule {
        field: Field::WhiteBritish,
        aliases: &["white_british"],
        recode: Recode::Flag,
    },
    DirectRule {
        field: Field::Eal,
        aliases: &["eal", "language_flag"],
        recode: Recode::Flag,
    },
    DirectRule {
        field: Field::IdaciDecile,
        aliases: &["idaci_decile", "idaci"],
        recode: Recode::Integer,
    },
    DirectRule {
        field: Field::HomeLa,
        aliases: &["home_la", "la_of_residence"],
        recode: Recode::Text,
    },
    DirectRule {
        field: Field::SchoolLa,
        aliases: &["school_la", "la"],
        recode: Recode::Text,
    },
    DirectRule {
        field: Field::SchoolId,
        aliases: &["school_id", "urn", "laestab"],
        recode: Recode::Text,
    },
    DirectRule {
        field: Field::Siblings,
        aliases: &["nsiblings", "n_siblings", "siblings"],
        recode: Recode::Integer,
    },
    DirectRule {
        field: Field::Fsm,
        aliases: &["fsm", "fsm_eligible", "fsmeligible"],
        recode: Recode::Flag,
    },
    DirectRule {
        field: Field::PartTime,
        aliases: &["part_time", "parttime"],
        recode: Recode::Flag,
    },
    DirectRule {
        field: Field::Sen,
        aliases: &["sen"],
        recode: Recode::Flag,
    },
];

const ETHNICITY_ALIASES: &[&str] = &["ethnicity", "ethnic_group"];
const LANGUAGE_ALIASES: &[&str] = &["first_language", "language"];
const SEN_PROVISION_ALIASES: &[&str] = &["sen_provision", "senprovision"];

pub fn recode(value: &str, recode: Recode) -> Option<String> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }
    match recode {
        Recode::Text => Some(text.to_string()),
        Recode::Integer => {
            if let Ok(v) = text.parse::<i64>() {
                return Some(v.to_string());
            }
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() && v.fract() == 0.0 => Some((v as i64).to_string()),
                _ => None,
            }
        }
        Recode::Flag => match text.to_ascii_lowercase().as_str() {
            "1" | "y" | "yes" | "true" | "t" => Some("1".to_string()),
            "0" | "n" | "no" | "false" | "f" => Some("0".to_string()),
            _ => None,
        },
        Recode::Sex => match text.to_ascii_lowercase().as_str() {
            "m" | "male" | "b" | "boy" | "1" => Some("M".to_string()),
            "f" | "female" | "g" | "girl" | "2" => Some("F".to_string()),
            _ => None,
        },
    }
}

fn white_british_from_ethnicity(code: &str) -> Option<String> {
    match code.trim().to_ascii_uppercase().as_str() {
        "" | "REFU" | "NOBT" | "UNCL" => None,
        "WBRI" => Some("1".to_string()),
        _ => Some("0".to_string()),
    }
}

fn eal_from_language(code: &str) -> Option<String> {
    match code.trim().to_ascii_uppercase().as_str() {
        "" | "NOT" | "REF" | "UNC" | "UNK" => None,
        "ENG" | "ENB" => Some("0".to_string()),
        _ => Some("1".to_string()),
    }
}

/// Expands a special-needs provision code into the four provision flags.
/// `A`/`P`/`S` are the pre-2014 School Action, Action Plus and Statement codes;
/// `K`/`E` are SEN support and education, health and care plans from 2014 on.
pub fn sen_flags(code: &str) -> Option<[(Field, bool); 4]> {
    let (action, plus, statement) = match code.trim().to_ascii_uppercase().as_str() {
        "N" => (false, false, false),
        "A" => (true, false, false),
        "P" => (false, true, false),
        "S" | "E" => (false, false, true),
        "K" => (false, false, false),
        _ => return None,
    };
    let any = !matches!(code.trim().to_ascii_uppercase().as_str(), "N");
    Some([
        (Field::Sen, any),
        (Field::SenAction, action),
        (Field::SenActionPlus, plus),
        (Field::SenStatement, statement),
    ])
}

fn first_present(table: &Table, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| table.column_index(alias))
}

/// Column resolution for one yearly extract.
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    direct: Vec<(Field, usize, Recode)>,
    ethnicity: Option<usize>,
    language: Option<usize>,
    sen_provision: Option<usize>,
}

impl SnapshotLayout {
    pub fn resolve(table: &Table) -> Self {
        let direct: Vec<(Field, usize, Recode)> = DIRECT_RULES
            .iter()
            .filter_map(|rule| first_present(table, rule.aliases).map(|idx| (rule.field, idx, rule.recode)))
            .collect();
        let has = |field: Field| direct.iter().any(|(f, _, _)| *f == field);

        let ethnicity = if has(Field::WhiteBritish) {
            None
        } else {
            first_present(table, ETHNICITY_ALIASES)
        };
        let language = if has(Field::Eal) {
            None
        } else {
            first_present(table, LANGUAGE_ALIASES)
        };
        let sen_provision = first_present(table, SEN_PROVISION_ALIASES);

        Self {
            direct,
            ethnicity,
            language,
            sen_provision,
        }
    }

    /// Fields this extract can supply.
    pub fn fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = self.direct.iter().map(|(f, _, _)| *f).collect();
        if self.ethnicity.is_some() {
            fields.push(Field::WhiteBritish);
        }
        if self.language.is_some() {
            fields.push(Field::Eal);
        }
        if self.sen_provision.is_some() {
            fields.extend([Field::Sen, Field::SenAction, Field::SenActionPlus, Field::SenStatement]);
        }
        fields.sort();
        fields.dedup();
        fields
    }

    /// Recoded observations for one row. A direct `sen` column takes precedence
    /// over the flag derived from the provision code.
    pub fn observe(&self, table: &Table, row: usize) -> Vec<(Field, String)> {
        let mut out = Vec::with_capacity(self.direct.len() + 4);
        for &(field, idx, how) in &self.direct {
            if let Some(value) = table.cell_at(row, idx).and_then(|v| recode(v, how)) {
                out.push((field, value));
            }
        }
        if let Some(value) = self
            .ethnicity
            .and_then(|idx| table.cell_at(row, idx))
            .and_then(white_british_from_ethnicity)
        {
            out.push((Field::WhiteBritish, value));
        }
        if let Some(value) = self
            .language
            .and_then(|idx| table.cell_at(row, idx))
            .and_then(eal_from_language)
        {
            out.push((Field::Eal, value));
        }
        if let Some(flags) = self
            .sen_provision
            .and_then(|idx| table.cell_at(row, idx))
            .and_then(sen_flags)
        {
            let direct_sen = out.iter().any(|(f, _)| *f == Field::Sen);
            for (field, flag) in flags {
                if field == Field::Sen && direct_sen {
                    continue;
                }
                out.push((field, if flag { "1" } else { "0" }.to_string()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], row: &[&str]) -> Table {
        Table::from_rows(
            columns.iter().map(|s| s.to_string()).collect(),
            vec![row.iter().map(|s| Some(s.to_string())).collect()],
        )
    }

    fn lookup(obs: &[(Field, String)], field: Field) -> Option<&str> {
        obs.iter().find(|(f, _)| *f == field).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_recodings() {
        assert_eq!(recode(" 03 ", Recode::Integer).as_deref(), Some("3"));
        assert_eq!(recode("2.0", Recode::Integer).as_deref(), Some("2"));
        assert_eq!(recode("2.5", Recode::Integer), None);
        assert_eq!(recode("Yes", Recode::Flag).as_deref(), Some("1"));
        assert_eq!(recode("unknown", Recode::Flag), None);
        assert_eq!(recode("2", Recode::Sex).as_deref(), Some("F"));
        assert_eq!(recode("m", Recode::Sex).as_deref(), Some("M"));
    }

    #[test]
    fn test_aliases_and_derived_fields() {
        let t = table(
            &["upn", "gender", "ethnicity", "first_language", "senprovision", "urn"],
            &["p1", "1", "WBRI", "POL", "P", "100200"],
        );
        let layout = SnapshotLayout::resolve(&t);
        let obs = layout.observe(&t, 0);
        assert_eq!(lookup(&obs, Field::Sex), Some("M"));
        assert_eq!(lookup(&obs, Field::WhiteBritish), Some("1"));
        assert_eq!(lookup(&obs, Field::Eal), Some("1"));
        assert_eq!(lookup(&obs, Field::Sen), Some("1"));
        assert_eq!(lookup(&obs, Field::SenActionPlus), Some("1"));
        assert_eq!(lookup(&obs, Field::SenStatement), Some("0"));
        assert_eq!(lookup(&obs, Field::SchoolId), Some("100200"));
        assert_eq!(lookup(&obs, Field::Fsm), None);
        assert!(!layout.fields().contains(&Field::Fsm));
    }

    #[test]
    fn test_post_2014_provision_codes() {
        assert_eq!(sen_flags("K").unwrap()[0], (Field::Sen, true));
        let ehc = sen_flags("e").unwrap();
        assert_eq!(ehc[3], (Field::SenStatement, true));
        let none = sen_flags("N").unwrap();
        assert!(none.iter().all(|(_, flag)| !flag));
        assert!(sen_flags("?").is_none());
    }
}
