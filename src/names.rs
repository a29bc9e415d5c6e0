//! Session name generator.

const NAMES: &[&str] = &[
    "bulboar", "charmeleot", "squirtelle", "pidgeotto", "rattlecap", "ekansit",
    "sandslashi", "nidorangue", "vulpixel", "zubatton", "oddishron", "parasecto",
    "diglettuce", "meowthorn", "psyducken", "mankeyper", "growlithium", "poliwhirm",
    "abrakad", "machokett", "tentacool", "geodudest", "ponytail", "slowpoker",
    "magnemiter", "doduodle", "seelount", "grimerald", "shellderby", "gastlier",
    "onixpected", "drowzeep", "krabbler", "voltorbit", "exeggutor", "cubonehead",
    "hitmonchap", "lickitung", "koffingle", "rhyhornet",
];

/// Pick a session name. Uses UUID entropy rather than a RNG dependency;
/// a numeric suffix keeps collisions apart.
pub fn generate(taken: &[String]) -> String {
    let entropy = uuid::Uuid::new_v4();
    let base = NAMES[entropy.as_bytes()[0] as usize % NAMES.len()];
    if !taken.iter().any(|t| t == base) {
        return base.to_string();
    }
    for i in 2.. {
        let candidate = format!("{}-{}", base, i);
        if !taken.iter().any(|t| t == &candidate) {
            return candidate;
        }
    }
    unreachable!()
}
