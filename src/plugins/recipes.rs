//! Recipe-specific validation on top of the generic record store.

use crate::core::error::ExocortexError;
use crate::core::fsops::RecordFs;
use crate::plugins::records::{Record, RecordStore};
use regex::Regex;
use serde::Serialize;
use serde_yaml::Value;
use std::path::PathBuf;
use std::sync::LazyLock;

pub const RECIPE_STATUSES: [&str; 4] = ["To try", "Try next", "Tried", "Perfected"];
const REQUIRED_FIELDS: [&str; 3] = ["id", "name", "status"];
const MAX_SLUG_LEN: usize = 50;

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("static slug regex"));
static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_]+").expect("static separator regex"));
static DISALLOWED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]").expect("static disallowed regex"));
static DASHES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-+").expect("static dashes regex"));

/// Hebrew letters to Latin. Unmapped niqqud and punctuation fall out in
/// the disallowed-character pass.
fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'א' | 'ע' => "",
        'ב' => "b",
        'ג' => "g",
        'ד' => "d",
        'ה' => "h",
        'ו' => "v",
        'ז' => "z",
        'ח' => "ch",
        'ט' | 'ת' => "t",
        'י' => "y",
        'כ' | 'ך' | 'ק' => "k",
        'ל' => "l",
        'מ' | 'ם' => "m",
        'נ' | 'ן' => "n",
        'ס' => "s",
        'פ' => "p",
        'ף' => "f",
        'צ' | 'ץ' => "ts",
        'ר' => "r",
        'ש' => "sh",
        _ => return None,
    })
}

/// URL-safe slug for a recipe name, e.g. `"Banana Bread!!!"` -> `banana-bread`.
pub fn generate_slug(name: &str) -> String {
    let transliterated: String = name
        .chars()
        .map(|c| transliterate(c).map(str::to_string).unwrap_or_else(|| c.to_string()))
        .collect();
    let lowered = transliterated.to_lowercase();
    let dashed = SEPARATOR_RE.replace_all(&lowered, "-");
    let cleaned = DISALLOWED_RE.replace_all(&dashed, "");
    let collapsed = DASHES_RE.replace_all(&cleaned, "-");
    let mut slug = collapsed.trim_matches('-').to_string();
    if slug.len() > MAX_SLUG_LEN {
        // Slug is ASCII at this point, so byte truncation is safe.
        slug.truncate(MAX_SLUG_LEN);
        slug = slug.trim_end_matches('-').to_string();
    }
    slug
}

pub fn is_slug(s: &str) -> bool {
    SLUG_RE.is_match(s)
}

/// Field-level problems with one recipe. Empty means valid.
pub fn validate_recipe(record: &Record) -> Vec<String> {
    let mut errors = Vec::new();

    for field in REQUIRED_FIELDS {
        let present = match record.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            errors.push(format!("Missing required field: {}", field));
        }
    }

    if let Some(status) = record.status() {
        if !RECIPE_STATUSES.contains(&status) {
            errors.push(format!(
                "Invalid status: '{}' (expected one of: {})",
                status,
                RECIPE_STATUSES.join(", ")
            ));
        }
    }

    match record.get("rating") {
        None | Some(Value::Null) => {}
        Some(v) => match v.as_f64() {
            Some(r) if (1.0..=5.0).contains(&r) => {}
            _ => errors.push(format!("Invalid rating: {} (must be 1-5)", render_scalar(v))),
        },
    }

    for field in ["ingredients", "instructions"] {
        if let Some(v) = record.get(field) {
            if !v.is_sequence() {
                errors.push(format!("{} must be a list", capitalize(field)));
            }
        }
    }

    if let Some(id) = record.get_str("id") {
        if !is_slug(id) {
            let suggestion = record
                .get_str("name")
                .map(generate_slug)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| generate_slug(id));
            errors.push(format!("Invalid id: '{}' is not a slug (try '{}')", id, suggestion));
        } else if id != record.id() {
            errors.push(format!(
                "id '{}' does not match file name '{}'",
                id,
                record.id()
            ));
        }
    }

    errors
}

fn render_scalar(v: &Value) -> String {
    serde_yaml::to_string(v)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| format!("{:?}", v))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeIssues {
    pub record_id: String,
    pub location: PathBuf,
    pub errors: Vec<String>,
}

/// Validate every listed recipe. Unreadable files are reported as issues.
pub fn validate_collection<F: RecordFs>(
    store: &RecordStore<F>,
) -> Result<Vec<RecipeIssues>, ExocortexError> {
    let listing = store.list(None)?;
    let mut out: Vec<RecipeIssues> = listing
        .records
        .iter()
        .filter_map(|record| {
            let errors = validate_recipe(record);
            (!errors.is_empty()).then(|| RecipeIssues {
                record_id: record.id(),
                location: record.location.clone(),
                errors,
            })
        })
        .collect();
    out.extend(listing.skipped.into_iter().map(|(location, reason)| RecipeIssues {
        record_id: crate::plugins::records::record_id(&location),
        location,
        errors: vec![reason],
    }));
    Ok(out)
}
