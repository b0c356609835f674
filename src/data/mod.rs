//! Static classification tables
//!
//! Keyword and alias tables consumed by the content processor. The catalog
//! itself is maintained externally; these are the working subsets the
//! pipeline classifies against.

use crate::models::Topic;

/// Keywords scored per topic over title + leading body text
pub const TOPIC_KEYWORDS: &[(Topic, &[&str])] = &[
    (
        Topic::General,
        &[
            "news", "breaking", "update", "report", "announcement", "latest", "headline", "story",
            "coverage", "incident", "event",
        ],
    ),
    (
        Topic::Technology,
        &[
            "technology",
            "tech",
            "software",
            "hardware",
            "app",
            "application",
            "platform",
            "digital",
            "internet",
            "web",
            "online",
            "cyber",
            "data",
            "algorithm",
            "programming",
            "developer",
            "innovation",
            "gadget",
            "device",
            "smartphone",
            "computer",
            "laptop",
        ],
    ),
    (
        Topic::Business,
        &[
            "business",
            "company",
            "corporation",
            "enterprise",
            "firm",
            "industry",
            "economy",
            "economic",
            "market",
            "revenue",
            "profit",
            "earnings",
            "sales",
            "growth",
            "investment",
            "investor",
            "trade",
            "commerce",
            "merger",
            "acquisition",
            "ipo",
            "ceo",
            "executive",
        ],
    ),
    (
        Topic::Politics,
        &[
            "politics",
            "political",
            "government",
            "minister",
            "prime minister",
            "president",
            "election",
            "vote",
            "voting",
            "parliament",
            "congress",
            "senate",
            "policy",
            "legislation",
            "bill",
            "regulation",
            "democracy",
            "campaign",
            "debate",
        ],
    ),
    (
        Topic::Sports,
        &[
            "sports",
            "sport",
            "game",
            "match",
            "tournament",
            "championship",
            "league",
            "team",
            "player",
            "athlete",
            "coach",
            "football",
            "soccer",
            "cricket",
            "basketball",
            "tennis",
            "olympics",
            "score",
            "victory",
        ],
    ),
    (
        Topic::Entertainment,
        &[
            "entertainment",
            "movie",
            "film",
            "cinema",
            "bollywood",
            "hollywood",
            "actor",
            "actress",
            "director",
            "music",
            "song",
            "album",
            "concert",
            "television",
            "series",
            "celebrity",
            "award",
            "oscar",
            "premiere",
        ],
    ),
    (
        Topic::Science,
        &[
            "science",
            "scientific",
            "research",
            "study",
            "discovery",
            "experiment",
            "laboratory",
            "university",
            "academic",
            "physics",
            "chemistry",
            "biology",
            "space",
            "nasa",
            "astronomy",
            "climate",
            "environment",
        ],
    ),
    (
        Topic::Health,
        &[
            "health",
            "healthcare",
            "medical",
            "medicine",
            "hospital",
            "doctor",
            "patient",
            "disease",
            "illness",
            "virus",
            "pandemic",
            "vaccine",
            "vaccination",
            "treatment",
            "therapy",
            "diagnosis",
            "wellness",
            "nutrition",
        ],
    ),
    (
        Topic::Stocks,
        &[
            "stock",
            "stocks",
            "share",
            "shares",
            "equity",
            "stock market",
            "trading",
            "trader",
            "portfolio",
            "dividend",
            "nasdaq",
            "nyse",
            "nifty",
            "sensex",
            "dow jones",
            "rally",
            "volatility",
            "quarterly",
            "valuation",
        ],
    ),
    (
        Topic::Startups,
        &[
            "startup",
            "startups",
            "entrepreneur",
            "founder",
            "co-founder",
            "venture",
            "venture capital",
            "funding",
            "seed",
            "series a",
            "series b",
            "angel investor",
            "accelerator",
            "incubator",
            "unicorn",
            "bootstrap",
            "product launch",
        ],
    ),
    (
        Topic::Ai,
        &[
            "ai",
            "artificial intelligence",
            "machine learning",
            "deep learning",
            "neural network",
            "automation",
            "robot",
            "robotics",
            "chatbot",
            "nlp",
            "computer vision",
            "openai",
            "gpt",
            "chatgpt",
            "llm",
            "large language model",
            "data science",
            "autonomous",
        ],
    ),
    (
        Topic::Finance,
        &[
            "finance",
            "financial",
            "bank",
            "banking",
            "loan",
            "credit",
            "debt",
            "insurance",
            "mortgage",
            "interest",
            "federal reserve",
            "monetary",
            "fiscal",
            "budget",
            "tax",
            "currency",
            "bitcoin",
            "cryptocurrency",
            "forex",
        ],
    ),
    (
        Topic::Energy,
        &[
            "energy",
            "oil",
            "gas",
            "coal",
            "renewable",
            "solar",
            "wind",
            "nuclear",
            "power",
            "electricity",
            "grid",
            "battery",
            "fuel",
            "petroleum",
            "opec",
            "crude",
            "pipeline",
            "carbon",
            "emission",
        ],
    ),
    (
        Topic::Automotive,
        &[
            "car",
            "auto",
            "automobile",
            "vehicle",
            "electric vehicle",
            "ev",
            "tesla",
            "toyota",
            "honda",
            "ford",
            "automotive",
            "driving",
            "self-driving",
            "ride-sharing",
        ],
    ),
];

/// Country aliases checked as substrings over title + leading body text
pub const COUNTRY_ALIASES: &[(&str, &[&str])] = &[
    (
        "United States",
        &[
            "usa",
            "united states",
            "america",
            "u.s.a",
            "u.s.",
            "american",
            "washington",
            "new york",
            "california",
        ],
    ),
    (
        "United Kingdom",
        &[
            "uk",
            "britain",
            "great britain",
            "england",
            "scotland",
            "wales",
            "british",
            "london",
            "united kingdom",
        ],
    ),
    (
        "Canada",
        &["canada", "canadian", "toronto", "vancouver", "montreal", "ottawa"],
    ),
    (
        "Australia",
        &["australia", "australian", "sydney", "melbourne", "canberra"],
    ),
    (
        "India",
        &[
            "india",
            "indian",
            "bharat",
            "delhi",
            "mumbai",
            "bangalore",
            "chennai",
            "kolkata",
            "hyderabad",
            "new delhi",
        ],
    ),
    (
        "China",
        &["china", "chinese", "beijing", "shanghai", "hong kong"],
    ),
    ("Japan", &["japan", "japanese", "tokyo", "osaka"]),
    ("South Korea", &["south korea", "korea", "korean", "seoul"]),
    ("Singapore", &["singapore", "singaporean"]),
    (
        "Germany",
        &["germany", "german", "deutschland", "berlin", "munich"],
    ),
    ("France", &["france", "french", "paris", "lyon"]),
    ("Russia", &["russia", "russian", "moscow", "kremlin"]),
    ("Italy", &["italy", "italian", "rome", "milan"]),
    ("Spain", &["spain", "spanish", "madrid", "barcelona"]),
    (
        "Netherlands",
        &["netherlands", "dutch", "holland", "amsterdam"],
    ),
    ("Switzerland", &["switzerland", "swiss", "zurich", "geneva"]),
    ("Brazil", &["brazil", "brazilian", "sao paulo", "brasilia"]),
    ("Mexico", &["mexico", "mexican", "mexico city"]),
    (
        "United Arab Emirates",
        &["uae", "dubai", "abu dhabi", "emirates"],
    ),
    ("Israel", &["israel", "israeli", "tel aviv", "jerusalem"]),
    ("Ukraine", &["ukraine", "ukrainian", "kyiv", "kiev"]),
    ("South Africa", &["south africa", "johannesburg", "cape town"]),
];

/// Keywords signalling breaking news, counted over title + body head
pub const BREAKING_KEYWORDS: &[&str] = &[
    "breaking",
    "urgent",
    "alert",
    "just in",
    "developing",
    "exclusive",
    "emergency",
    "crisis",
    "disaster",
    "tragedy",
];

/// Keywords signalling important (but not breaking) news
pub const IMPORTANT_KEYWORDS: &[&str] = &[
    "major",
    "significant",
    "historic",
    "unprecedented",
    "announcement",
    "decision",
    "ruling",
    "verdict",
];

/// All-caps tokens that look like tickers but are not
pub const STOCK_SYMBOL_BLACKLIST: &[&str] = &[
    "THE", "AND", "FOR", "ARE", "BUT", "NOT", "YOU", "ALL", "CAN", "HER", "WAS", "ONE", "OUR",
    "HAD", "HAS", "TWO", "WHO", "ITS", "DID", "GET", "USA", "CEO", "CTO", "CFO", "COO", "API",
    "URL", "PDF", "HTML", "CSS",
];

/// Market sector detection keywords
pub const SECTOR_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Technology",
        &["tech", "software", "ai", "digital", "app", "platform"],
    ),
    (
        "Finance",
        &["bank", "finance", "investment", "loan", "credit"],
    ),
    (
        "Healthcare",
        &["health", "medical", "pharma", "drug", "hospital"],
    ),
    ("Energy", &["oil", "gas", "energy", "renewable", "solar"]),
    (
        "Retail",
        &["retail", "store", "shopping", "consumer", "brand"],
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_topic_has_keywords() {
        for topic in Topic::ALL {
            assert!(
                TOPIC_KEYWORDS.iter().any(|(t, kws)| *t == topic && !kws.is_empty()),
                "missing keywords for {topic}"
            );
        }
    }

    #[test]
    fn test_alias_tables_are_lowercase() {
        for (_, aliases) in COUNTRY_ALIASES {
            for alias in *aliases {
                assert_eq!(*alias, alias.to_lowercase());
            }
        }
    }

    #[test]
    fn test_blacklist_filters_common_words() {
        assert!(STOCK_SYMBOL_BLACKLIST.contains(&"CEO"));
        assert!(STOCK_SYMBOL_BLACKLIST.contains(&"HTML"));
        assert!(!STOCK_SYMBOL_BLACKLIST.contains(&"AAPL"));
    }
}
