//! Event category catalogue.
//!
//! Single source of truth for the categories used by classification,
//! preference rows and cold-start interest text.

/// Fallback label for unclassified events. Never a preference category.
pub const GENERAL: &str = "general";

/// Category name and the interest description used for cold-start embedding text.
pub const CATEGORIES: [(&str, &str); 13] = [
    (
        "academic_workshops",
        "academic workshops, revision sessions, study groups",
    ),
    (
        "arts_music",
        "arts, music, creative performances, exhibitions",
    ),
    (
        "career_networking",
        "career development, networking, industry connections",
    ),
    ("entrepreneurship", "startups, entrepreneurship, business"),
    (
        "environment_sustainability",
        "environment, sustainability, green initiatives, climate",
    ),
    ("food_dining", "food, dining, cooking, culinary experiences"),
    ("gaming_esports", "gaming, esports, video games, tournaments"),
    (
        "health_wellness",
        "health, wellness, mental health, self-care",
    ),
    (
        "social_cultural",
        "social events, parties, cultural activities",
    ),
    ("sports_fitness", "sports, fitness, physical activities"),
    (
        "tech_innovation",
        "technology, AI, machine learning, coding",
    ),
    (
        "travel_adventure",
        "travel, adventure, outdoor activities, exploration",
    ),
    (
        "volunteering_community",
        "volunteering, community service, charity events",
    ),
];

/// Number of preference categories.
pub const NUM_CATEGORIES: usize = CATEGORIES.len();

/// Score every category holds before any feedback: 1/13.
pub const UNIFORM_BASELINE: f32 = 1.0 / NUM_CATEGORIES as f32;

/// Iterate category names in catalogue order.
pub fn names() -> impl Iterator<Item = &'static str> {
    CATEGORIES.iter().map(|(name, _)| *name)
}

/// Check if `name` is one of the preference categories.
pub fn is_known(name: &str) -> bool {
    CATEGORIES.iter().any(|(n, _)| *n == name)
}

/// Interest description for a category.
pub fn description(name: &str) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, desc)| *desc)
}

/// Normalize a raw label: trim, lowercase, map unknown labels to `general`.
pub fn normalize(raw: &str) -> String {
    let label = raw.trim().to_lowercase();
    if is_known(&label) {
        label
    } else {
        GENERAL.to_string()
    }
}

/// Human readable form of a category name (`tech_innovation` -> `tech innovation`).
pub fn display_name(name: &str) -> String {
    name.replace('_', " ")
}
