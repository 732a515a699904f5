//! The fixed structure of the profile: six areas of learning, thirteen scales,
//! nine binary items per scale. Column names for items and totals are derived
//! from the codes here and shared by every later stage.

use ahash::AHashMap;
use std::ops::Range;

/// Every scale carries exactly nine items, in every domain.
pub const ITEMS_PER_SCALE: usize = 9;

/// Column holding the overall profile total.
pub const OVERALL_COLUMN: &str = "total";
pub const OVERALL_LABEL: &str = "Overall profile";

#[derive(Debug, Clone, Copy)]
pub struct ScaleSpec {
    pub code: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct DomainSpec {
    pub code: &'static str,
    pub label: &'static str,
    pub scales: &'static [ScaleSpec],
}

pub const DOMAINS: [DomainSpec; 6] = [
    DomainSpec {
        code: "psed",
        label: "Personal, social and emotional development",
        scales: &[
            ScaleSpec {
                code: "da",
                label: "Dispositions and attitudes",
            },
            ScaleSpec {
                code: "sd",
                label: "Social development",
            },
            ScaleSpec {
                code: "ed",
                label: "Emotional development",
            },
        ],
    },
    DomainSpec {
        code: "cll",
        label: "Communication, language and literacy",
        scales: &[
            ScaleSpec {
                code: "lct",
                label: "Language for communication and thinking",
            },
            ScaleSpec {
                code: "lsl",
                label: "Linking sounds and letters",
            },
            ScaleSpec {
                code: "r",
                label: "Reading",
            },
            ScaleSpec {
                code: "w",
                label: "Writing",
            },
        ],
    },
    DomainSpec {
        code: "psrn",
        label: "Problem solving, reasoning and numeracy",
        scales: &[
            ScaleSpec {
                code: "nlc",
                label: "Numbers as labels and for counting",
            },
            ScaleSpec {
                code: "c",
                label: "Calculating",
            },
            ScaleSpec {
                code: "ssm",
                label: "Shape, space and measures",
            },
        ],
    },
    DomainSpec {
        code: "kuw",
        label: "Knowledge and understanding of the world",
        scales: &[ScaleSpec {
            code: "kuw",
            label: "Knowledge and understanding of the world",
        }],
    },
    DomainSpec {
        code: "pd",
        label: "Physical development",
        scales: &[ScaleSpec {
            code: "pd",
            label: "Physical development",
        }],
    },
    DomainSpec {
        code: "cd",
        label: "Creative development",
        scales: &[ScaleSpec {
            code: "cd",
            label: "Creative development",
        }],
    },
];

/// One scale with its resolved column names.
#[derive(Debug, Clone)]
pub struct ScaleEntry {
    pub domain: usize,
    pub label: &'static str,
    pub total_column: String,
    pub item_columns: Vec<String>,
    pub max: u16,
}

/// One domain with its resolved total column and the scales it sums.
#[derive(Debug, Clone)]
pub struct DomainEntry {
    pub label: &'static str,
    pub total_column: String,
    pub scales: Range<usize>,
    pub max: u16,
}

/// Flattened, ordered view of the profile used for lookups by column name.
#[derive(Debug, Clone)]
pub struct Catalogue {
    scales: Vec<ScaleEntry>,
    domains: Vec<DomainEntry>,
    item_index: AHashMap<String, usize>,
}

impl Catalogue {
    /// The 13-scale, 117-point profile.
    pub fn eyfsp() -> Self {
        Self::from_domains(&DOMAINS)
    }

    pub fn from_domains(specs: &[DomainSpec]) -> Self {
        let mut scales = Vec::new();
        let mut domains = Vec::with_capacity(specs.len());
        let mut item_index = AHashMap::new();

        for (d, spec) in specs.iter().enumerate() {
            let first = scales.len();
            let single = spec.scales.len() == 1;
            for scale in spec.scales {
                let stem = if single {
                    spec.code.to_string()
                } else {
                    format!("{}_{}", spec.code, scale.code)
                };
                let total_column = if single {
                    format!("{stem}_scale")
                } else {
                    stem.clone()
                };
                let item_columns: Vec<String> = (1..=ITEMS_PER_SCALE)
                    .map(|k| format!("{stem}_{k}"))
                    .collect();
                for column in &item_columns {
                    let position = item_index.len();
                    item_index.insert(column.clone(), position);
                }
                scales.push(ScaleEntry {
                    domain: d,
                    label: scale.label,
                    total_column,
                    item_columns,
                    max: ITEMS_PER_SCALE as u16,
                });
            }
            domains.push(DomainEntry {
                label: spec.label,
                total_column: spec.code.to_string(),
                scales: first..scales.len(),
                max: (spec.scales.len() * ITEMS_PER_SCALE) as u16,
            });
        }

        Self {
            scales,
            domains,
            item_index,
        }
    }

    pub fn scales(&self) -> &[ScaleEntry] {
        &self.scales
    }

    pub fn domains(&self) -> &[DomainEntry] {
        &self.domains
    }

    pub fn item_count(&self) -> usize {
        self.scales.len() * ITEMS_PER_SCALE
    }

    /// Item columns in catalogue order (scale by scale, item 1 to 9).
    pub fn item_columns(&self) -> impl Iterator<Item = &str> {
        self.scales
            .iter()
            .flat_map(|scale| scale.item_columns.iter().map(String::as_str))
    }

    /// Flat position of an item column, if the column names a profile item.
    pub fn item_position(&self, column: &str) -> Option<usize> {
        self.item_index.get(column).copied()
    }

    pub fn overall_max(&self) -> u16 {
        self.domains.iter().map(|d| d.max).sum()
    }
}
