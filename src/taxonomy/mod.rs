//! Taxonomy resolution for candidate records
//!
//! Infers sector, subsector, and discipline from record text plus the
//! parent document title using priority-weighted multi-pattern scoring,
//! then validates the result against the taxonomy store. An inferred pair
//! that fails validation degrades to the `General` sector rather than
//! being persisted.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fallback sector assigned when inference misses or validation fails
pub const GENERAL_SECTOR: &str = "General";

/// Body pattern hits count double relative to title hits
const BODY_HIT_WEIGHT: f64 = 2.0;
const TITLE_HIT_WEIGHT: f64 = 1.0;

/// Bonus applied to the education group when any of its patterns match.
///
/// Keeps keyword-overlapping generic groups (shared terms like "public")
/// from claiming school-domain content.
const EDUCATION_MATCH_BONUS: f64 = 3.0;

/// Minimum winning score; below this the record falls back to General
const MIN_SECTOR_SCORE: f64 = 2.0;

// ============================================================================
// Taxonomy Store
// ============================================================================

/// One sector node with its owned subsectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorNode {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub subsectors: Vec<String>,
}

/// In-memory view of the taxonomy graph, read-only from the pipeline's
/// perspective. Loaded from the persistent store or seeded from the
/// compiled-in defaults.
#[derive(Debug, Clone)]
pub struct TaxonomyStore {
    sectors: Vec<SectorNode>,
    disciplines: Vec<String>,
}

impl TaxonomyStore {
    pub fn new(sectors: Vec<SectorNode>, disciplines: Vec<String>) -> Self {
        Self {
            sectors,
            disciplines,
        }
    }

    /// Build the store from the compiled-in seed taxonomy
    pub fn seeded() -> Self {
        let sectors = seed_sectors()
            .iter()
            .enumerate()
            .map(|(i, (name, subsectors))| SectorNode {
                id: i as i64 + 1,
                name: (*name).to_string(),
                active: true,
                subsectors: subsectors.iter().map(|s| (*s).to_string()).collect(),
            })
            .collect();

        Self {
            sectors,
            disciplines: seed_disciplines().iter().map(|d| (*d).to_string()).collect(),
        }
    }

    pub fn sector(&self, name: &str) -> Option<&SectorNode> {
        self.sectors.iter().find(|s| s.name == name)
    }

    pub fn sectors(&self) -> &[SectorNode] {
        &self.sectors
    }

    pub fn disciplines(&self) -> &[String] {
        &self.disciplines
    }

    pub fn has_discipline(&self, name: &str) -> bool {
        self.disciplines.iter().any(|d| d == name)
    }

    /// Check the sector/subsector validity invariant: the sector exists and
    /// is active, and the subsector (when present) belongs to that sector.
    pub fn is_valid_pair(&self, sector: &str, subsector: Option<&str>) -> bool {
        match self.sector(sector) {
            Some(node) if node.active => match subsector {
                Some(sub) => node.subsectors.iter().any(|s| s == sub),
                None => true,
            },
            _ => false,
        }
    }
}

/// The 16 fixed sectors plus General, each with its subsector set
fn seed_sectors() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        (
            "Education Facilities",
            vec!["K-12 Schools", "Higher Education", "Pre-K and Early Learning"],
        ),
        (
            "Government Facilities",
            vec!["Courthouses", "Municipal Buildings", "Federal Buildings"],
        ),
        (
            "Commercial Facilities",
            vec!["Retail", "Lodging", "Entertainment Venues", "Office Buildings"],
        ),
        (
            "Healthcare and Public Health",
            vec!["Hospitals", "Clinics", "Long-Term Care"],
        ),
        ("Energy", vec!["Electric Power", "Oil and Gas"]),
        (
            "Water and Wastewater Systems",
            vec!["Drinking Water", "Wastewater Treatment"],
        ),
        (
            "Transportation Systems",
            vec!["Mass Transit", "Aviation", "Highway and Motor Carrier", "Rail"],
        ),
        ("Communications", vec!["Broadcasting", "Telecommunications"]),
        ("Information Technology", vec!["Data Centers"]),
        ("Financial Services", vec!["Banking", "Insurance"]),
        (
            "Emergency Services",
            vec!["Law Enforcement", "Fire and Rescue", "Emergency Medical Services"],
        ),
        (
            "Food and Agriculture",
            vec!["Food Processing", "Agriculture Production"],
        ),
        ("Chemical", vec!["Chemical Manufacturing", "Chemical Storage"]),
        ("Critical Manufacturing", vec!["Primary Metals", "Machinery"]),
        ("Dams", vec!["Hydropower", "Levees"]),
        ("Defense Industrial Base", vec!["Defense Manufacturing"]),
        (GENERAL_SECTOR, vec![]),
    ]
}

/// Flat, independently-maintained discipline vocabulary
fn seed_disciplines() -> Vec<&'static str> {
    vec![
        "Physical Security",
        "Personnel Security",
        "Emergency Management",
        "Operations Security",
        "Information Security",
    ]
}

// ============================================================================
// Pattern Groups
// ============================================================================

/// One sector's keyword patterns with an optional match bonus
struct SectorGroup {
    sector: &'static str,
    patterns: &'static [&'static str],
    match_bonus: f64,
}

/// Ordered sector pattern groups. Education is registered first and carries
/// the explicit match bonus; declaration order breaks exact score ties.
fn sector_groups() -> Vec<SectorGroup> {
    vec![
        SectorGroup {
            sector: "Education Facilities",
            patterns: &[
                "school", "schools", "student", "students", "teacher", "classroom",
                "campus", "k-12", "kindergarten", "public school", "education",
            ],
            match_bonus: EDUCATION_MATCH_BONUS,
        },
        SectorGroup {
            sector: "Government Facilities",
            patterns: &[
                "government", "public", "courthouse", "municipal", "federal",
                "city hall", "county",
            ],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Commercial Facilities",
            patterns: &[
                "retail", "mall", "hotel", "lodging", "stadium", "arena",
                "office building", "shopping",
            ],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Healthcare and Public Health",
            patterns: &[
                "hospital", "clinic", "patient", "medical", "healthcare",
                "nursing",
            ],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Energy",
            patterns: &["power plant", "electric", "substation", "oil", "gas pipeline", "grid"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Water and Wastewater Systems",
            patterns: &["water treatment", "wastewater", "drinking water", "reservoir", "pump station"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Transportation Systems",
            patterns: &[
                "transit", "airport", "aviation", "railway", "rail", "bus",
                "highway", "port",
            ],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Communications",
            patterns: &["broadcast", "telecom", "cell tower", "radio"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Information Technology",
            patterns: &["data center", "server room", "network infrastructure"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Financial Services",
            patterns: &["bank", "credit union", "financial institution", "insurance"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Emergency Services",
            patterns: &[
                "police", "law enforcement", "fire station", "fire department",
                "ems", "911", "dispatch",
            ],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Food and Agriculture",
            patterns: &["food processing", "farm", "agriculture", "grain", "livestock"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Chemical",
            patterns: &["chemical", "hazmat", "toxic release"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Critical Manufacturing",
            patterns: &["manufacturing", "factory", "assembly line", "industrial plant"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Dams",
            patterns: &["dam", "levee", "spillway", "impoundment"],
            match_bonus: 0.0,
        },
        SectorGroup {
            sector: "Defense Industrial Base",
            patterns: &["defense contractor", "military", "munitions", "armory"],
            match_bonus: 0.0,
        },
    ]
}

/// Subsector keyword patterns, looked up within the winning sector only
fn subsector_patterns(subsector: &str) -> &'static [&'static str] {
    match subsector {
        "K-12 Schools" => &["k-12", "elementary", "middle school", "high school", "school", "schools"],
        "Higher Education" => &["university", "college", "campus"],
        "Pre-K and Early Learning" => &["pre-k", "preschool", "daycare", "early learning"],
        "Courthouses" => &["courthouse", "court", "judicial"],
        "Municipal Buildings" => &["municipal", "city hall", "town hall"],
        "Federal Buildings" => &["federal"],
        "Retail" => &["retail", "store", "shopping"],
        "Lodging" => &["hotel", "motel", "lodging"],
        "Entertainment Venues" => &["stadium", "arena", "theater", "venue"],
        "Office Buildings" => &["office"],
        "Hospitals" => &["hospital", "emergency department"],
        "Clinics" => &["clinic", "outpatient"],
        "Long-Term Care" => &["nursing home", "long-term care", "assisted living"],
        "Electric Power" => &["electric", "substation", "power plant", "grid"],
        "Oil and Gas" => &["oil", "gas", "pipeline", "refinery"],
        "Drinking Water" => &["drinking water", "water treatment", "reservoir"],
        "Wastewater Treatment" => &["wastewater", "sewage"],
        "Mass Transit" => &["transit", "subway", "bus"],
        "Aviation" => &["airport", "aviation", "terminal"],
        "Highway and Motor Carrier" => &["highway", "trucking"],
        "Rail" => &["rail", "railway", "train"],
        "Broadcasting" => &["broadcast", "radio", "television"],
        "Telecommunications" => &["telecom", "cell tower", "fiber"],
        "Data Centers" => &["data center", "server room"],
        "Banking" => &["bank", "credit union"],
        "Insurance" => &["insurance"],
        "Law Enforcement" => &["police", "law enforcement", "sheriff"],
        "Fire and Rescue" => &["fire station", "fire department", "rescue"],
        "Emergency Medical Services" => &["ems", "ambulance", "paramedic"],
        "Food Processing" => &["food processing", "processing plant"],
        "Agriculture Production" => &["farm", "crop", "livestock", "grain"],
        "Chemical Manufacturing" => &["chemical manufacturing", "chemical plant"],
        "Chemical Storage" => &["chemical storage", "tank farm"],
        "Primary Metals" => &["steel", "smelter", "metals"],
        "Machinery" => &["machinery", "machine shop"],
        "Hydropower" => &["hydropower", "hydroelectric"],
        "Levees" => &["levee", "floodwall"],
        "Defense Manufacturing" => &["defense", "munitions", "weapons"],
        _ => &[],
    }
}

/// Discipline keyword patterns over the flat vocabulary
fn discipline_patterns(discipline: &str) -> &'static [&'static str] {
    match discipline {
        "Physical Security" => &[
            "perimeter", "fence", "fencing", "door", "lock", "barrier", "lighting",
            "camera", "surveillance", "access control", "gate", "bollard", "alarm",
        ],
        "Personnel Security" => &[
            "background check", "insider threat", "badge", "credential", "vetting",
            "visitor management",
        ],
        "Emergency Management" => &[
            "evacuation", "drill", "emergency plan", "shelter", "lockdown",
            "continuity", "response plan",
        ],
        "Operations Security" => &[
            "procedure", "policy", "training", "awareness", "standard operating",
            "protocol",
        ],
        "Information Security" => &["information security", "data protection", "records"],
        _ => &[],
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolved classification for one candidate record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub sector: String,
    pub subsector: Option<String>,
    pub discipline: Option<String>,
}

impl Resolution {
    fn general() -> Self {
        Self {
            sector: GENERAL_SECTOR.to_string(),
            subsector: None,
            discipline: None,
        }
    }
}

/// Taxonomy resolver backed by the taxonomy store
pub struct TaxonomyResolver {
    store: TaxonomyStore,
    groups: Vec<SectorGroup>,
}

impl TaxonomyResolver {
    pub fn new(store: TaxonomyStore) -> Self {
        Self {
            store,
            groups: sector_groups(),
        }
    }

    pub fn store(&self) -> &TaxonomyStore {
        &self.store
    }

    /// Resolve sector, subsector, and discipline for one record.
    ///
    /// Never fails: a scoring miss or a store-validation failure degrades to
    /// the General sector with no subsector.
    pub fn resolve(&self, text: &str, document_title: &str) -> Resolution {
        let body = text.to_lowercase();
        let title = document_title.to_lowercase();

        let Some((sector, score)) = self.score_sectors(&body, &title) else {
            debug!("no sector group reached the minimum score, falling back to General");
            let mut resolution = Resolution::general();
            resolution.discipline = self.resolve_discipline(&body, &title);
            return resolution;
        };

        let subsector = self.resolve_subsector(sector, &body, &title);

        // Validate the inferred pair against the store before accepting it
        if !self.store.is_valid_pair(sector, subsector.as_deref()) {
            debug!(sector, ?subsector, "inferred pair failed taxonomy validation");
            let mut resolution = Resolution::general();
            resolution.discipline = self.resolve_discipline(&body, &title);
            return resolution;
        }

        debug!(sector, score, ?subsector, "taxonomy resolved");
        Resolution {
            sector: sector.to_string(),
            subsector,
            discipline: self.resolve_discipline(&body, &title),
        }
    }

    /// Score all sector groups; highest score above the minimum wins, with
    /// declaration order breaking exact ties (strict greater-than keeps the
    /// earlier group).
    fn score_sectors(&self, body: &str, title: &str) -> Option<(&'static str, f64)> {
        let mut best: Option<(&'static str, f64)> = None;

        for group in &self.groups {
            let body_hits = count_hits(group.patterns, body);
            let title_hits = count_hits(group.patterns, title);
            if body_hits == 0 && title_hits == 0 {
                continue;
            }

            let score = group.match_bonus
                + BODY_HIT_WEIGHT * body_hits as f64
                + TITLE_HIT_WEIGHT * title_hits as f64;

            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((group.sector, score));
            }
        }

        best.filter(|(_, score)| *score >= MIN_SECTOR_SCORE)
    }

    /// Choose a subsector within the winning sector, analogous scoring
    fn resolve_subsector(&self, sector: &str, body: &str, title: &str) -> Option<String> {
        let node = self.store.sector(sector)?;
        let mut best: Option<(&str, f64)> = None;

        for subsector in &node.subsectors {
            let patterns = subsector_patterns(subsector);
            let body_hits = count_hits(patterns, body);
            let title_hits = count_hits(patterns, title);
            if body_hits == 0 && title_hits == 0 {
                continue;
            }

            let score = BODY_HIT_WEIGHT * body_hits as f64 + TITLE_HIT_WEIGHT * title_hits as f64;
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((subsector, score));
            }
        }

        best.map(|(name, _)| name.to_string())
    }

    /// Score the flat discipline vocabulary; any hit qualifies
    fn resolve_discipline(&self, body: &str, title: &str) -> Option<String> {
        let mut best: Option<(&str, f64)> = None;

        for discipline in self.store.disciplines() {
            let patterns = discipline_patterns(discipline);
            let body_hits = count_hits(patterns, body);
            let title_hits = count_hits(patterns, title);
            if body_hits == 0 && title_hits == 0 {
                continue;
            }

            let score = BODY_HIT_WEIGHT * body_hits as f64 + TITLE_HIT_WEIGHT * title_hits as f64;
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((discipline, score));
            }
        }

        best.map(|(name, _)| name.to_string())
    }
}

/// Count how many patterns appear in the haystack (pre-lowercased)
fn count_hits(patterns: &[&str], haystack: &str) -> usize {
    patterns.iter().filter(|p| pattern_hit(haystack, p)).count()
}

/// Word-boundary-aware pattern search.
///
/// A hit must not sit inside a larger alphanumeric run, so "dam" does not
/// match "damaged" and "ems" does not match "systems".
fn pattern_hit(haystack: &str, pattern: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(pattern) {
        let abs = start + pos;
        let end = abs + pattern.len();
        let before_ok = abs == 0 || !bytes[abs - 1].is_ascii_alphanumeric();
        let after_ok = end == haystack.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}
