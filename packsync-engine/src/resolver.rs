//! Client capability resolver.
//!
//! Classifies a session as native-protocol or translated (joined through a
//! Bedrock compatibility layer) from proxy-reported markers, and decides
//! whether a pack push applies. Translated clients generally cannot fetch or
//! render Java-edition packs, so they are excluded unless the record is
//! explicitly flagged cross-platform.

use packsync_core::types::{ClientSession, PackRecord, ProtocolClass};

/// Client-brand substrings that identify a Bedrock translation layer.
const TRANSLATED_BRAND_MARKERS: &[&str] = &["geyser", "floodgate"];

/// Classify a session from its reported client brand and the proxy's
/// explicit translation flag.
///
/// The explicit flag wins; the brand scan covers proxies that only forward
/// the brand string.
pub fn classify(brand: Option<&str>, translated_marker: bool) -> ProtocolClass {
    if translated_marker {
        return ProtocolClass::Translated;
    }
    let Some(brand) = brand else {
        return ProtocolClass::Native;
    };
    let brand = brand.to_ascii_lowercase();
    if TRANSLATED_BRAND_MARKERS.iter().any(|m| brand.contains(m)) {
        ProtocolClass::Translated
    } else {
        ProtocolClass::Native
    }
}

/// Whether `record` may be pushed to `session`.
pub fn eligible(session: &ClientSession, record: &PackRecord) -> bool {
    match session.protocol_class {
        ProtocolClass::Native => true,
        ProtocolClass::Translated => record.cross_platform,
    }
}
