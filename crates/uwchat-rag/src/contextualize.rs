use once_cell::sync::Lazy;
use regex::Regex;

/// Region assumed when a place-seeking query names no location.
pub const HOME_REGION: &str = "Waterloo";

/// Words marking a query as place-seeking.
pub const PLACE_WORDS: &[&str] = &[
    "place",
    "restaurant",
    "cafe",
    "eat",
    "food",
    "dining",
    "bar",
    "pub",
];

/// Names and aliases of the home region and campus.
pub const HOME_REGION_TERMS: &[&str] = &[
    "waterloo",
    "kitchener",
    "cambridge",
    "ontario",
    "canada",
    "uwaterloo",
    "uw",
    "university",
];

/// Explicitly named other cities/regions. Incomplete by nature; unknown
/// places simply leave the query unmodified.
pub const OTHER_REGION_TERMS: &[&str] = &[
    "nyc",
    "sf",
    "la",
    "los angeles",
    "san francisco",
    "toronto",
    "new york",
    "vancouver",
    "montreal",
    "boston",
    "chicago",
    "seattle",
    "austin",
    "portland",
    "ottawa",
    "calgary",
    "edmonton",
    "halifax",
    "london",
    "hamilton",
    "mississauga",
    "brampton",
    "markham",
    "richmond hill",
    "oakville",
    "burlington",
    "guelph",
    "kingston",
    "windsor",
    "victoria",
    "winnipeg",
    "saskatoon",
    "regina",
    "st. john's",
    "fredericton",
    "charlottetown",
    "whitehorse",
    "yellowknife",
];

fn word_set(terms: &[&str]) -> Regex {
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("vocabulary regex")
}

static PLACE_RE: Lazy<Regex> = Lazy::new(|| word_set(PLACE_WORDS));
static HOME_RE: Lazy<Regex> = Lazy::new(|| word_set(HOME_REGION_TERMS));
static OTHER_RE: Lazy<Regex> = Lazy::new(|| word_set(OTHER_REGION_TERMS));

/// Anchor an ambiguous place-seeking query to the home region.
///
/// Rewrites only when the query is place-seeking and names neither the home
/// region nor another explicitly listed region; any region mention wins over
/// rewriting. A heuristic, not a classifier.
pub fn contextualize(query: &str) -> String {
    let place_seeking = PLACE_RE.is_match(query);
    let mentions_home = HOME_RE.is_match(query);
    let mentions_other = OTHER_RE.is_match(query);

    if place_seeking && !mentions_home && !mentions_other {
        format!("Places to {} in {}", query, HOME_REGION)
    } else {
        query.to_string()
    }
}
