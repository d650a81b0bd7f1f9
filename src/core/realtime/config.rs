//! Provider variant and voice configuration for the realtime protocol.
//!
//! The gateway speaks one wire protocol against two provider variants that
//! differ in authentication scheme and allowed voice set:
//! - Direct endpoint: bearer token plus beta header
//! - Azure endpoint: api-key header
//!
//! The variant is selected exactly once, at client construction, from the
//! target URL.

use serde::{Deserialize, Serialize};

/// Default realtime WebSocket endpoint for the direct variant.
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default audio sample rate for the realtime protocol.
pub const REALTIME_SAMPLE_RATE: u32 = 24000;

// =============================================================================
// Provider Variants
// =============================================================================

/// Supported provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderVariant {
    /// Direct realtime endpoint (bearer + beta header)
    #[default]
    Direct,
    /// Azure-hosted realtime endpoint (api-key header)
    Azure,
}

impl ProviderVariant {
    /// Infer the variant from the target URL.
    ///
    /// Azure-hosted deployments carry the `azure` marker in their hostname;
    /// everything else is treated as the direct endpoint.
    pub fn from_url(url: &str) -> Self {
        if url.to_lowercase().contains("azure") {
            Self::Azure
        } else {
            Self::Direct
        }
    }

    /// Parse variant from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "direct" | "openai" => Some(Self::Direct),
            "azure" => Some(Self::Azure),
            _ => None,
        }
    }

    /// Voices accepted by this variant.
    pub fn allowed_voices(&self) -> &'static [RealtimeVoice] {
        match self {
            Self::Direct => RealtimeVoice::direct_set(),
            Self::Azure => RealtimeVoice::azure_set(),
        }
    }
}

impl std::fmt::Display for ProviderVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderVariant::Direct => write!(f, "direct"),
            ProviderVariant::Azure => write!(f, "azure"),
        }
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Voices accepted across both provider variants.
///
/// The two variants expose disjoint voice sets; a client constructed with a
/// voice outside the active variant's set is rejected before any connection
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    /// Alloy voice (direct default)
    #[default]
    Alloy,
    /// Ash voice
    Ash,
    /// Ballad voice
    Ballad,
    /// Coral voice
    Coral,
    /// Echo voice
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
    /// Amuch voice (Azure)
    Amuch,
    /// Dan voice (Azure)
    Dan,
    /// Elan voice (Azure)
    Elan,
    /// Marilyn voice (Azure)
    Marilyn,
    /// Meadow voice (Azure)
    Meadow,
    /// Breeze voice (Azure)
    Breeze,
    /// Cove voice (Azure)
    Cove,
    /// Ember voice (Azure)
    Ember,
    /// Jupiter voice (Azure)
    Jupiter,
}

impl RealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
            Self::Amuch => "amuch",
            Self::Dan => "dan",
            Self::Elan => "elan",
            Self::Marilyn => "marilyn",
            Self::Meadow => "meadow",
            Self::Breeze => "breeze",
            Self::Cove => "cove",
            Self::Ember => "ember",
            Self::Jupiter => "jupiter",
        }
    }

    /// Parse from string. Unknown voices are rejected, not defaulted:
    /// voice validation is a construction-time failure.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "alloy" => Some(Self::Alloy),
            "ash" => Some(Self::Ash),
            "ballad" => Some(Self::Ballad),
            "coral" => Some(Self::Coral),
            "echo" => Some(Self::Echo),
            "sage" => Some(Self::Sage),
            "shimmer" => Some(Self::Shimmer),
            "verse" => Some(Self::Verse),
            "amuch" => Some(Self::Amuch),
            "dan" => Some(Self::Dan),
            "elan" => Some(Self::Elan),
            "marilyn" => Some(Self::Marilyn),
            "meadow" => Some(Self::Meadow),
            "breeze" => Some(Self::Breeze),
            "cove" => Some(Self::Cove),
            "ember" => Some(Self::Ember),
            "jupiter" => Some(Self::Jupiter),
            _ => None,
        }
    }

    /// Voices accepted by the direct variant.
    pub fn direct_set() -> &'static [RealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }

    /// Voices accepted by the Azure variant.
    pub fn azure_set() -> &'static [RealtimeVoice] {
        &[
            Self::Amuch,
            Self::Dan,
            Self::Elan,
            Self::Marilyn,
            Self::Meadow,
            Self::Breeze,
            Self::Cove,
            Self::Ember,
            Self::Jupiter,
        ]
    }

    /// Default voice for a variant.
    pub fn default_for(variant: ProviderVariant) -> Self {
        match variant {
            ProviderVariant::Direct => Self::Alloy,
            ProviderVariant::Azure => Self::Breeze,
        }
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Audio Formats
// =============================================================================

/// Supported audio formats for the realtime protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeAudioFormat {
    /// PCM 16-bit signed little-endian (default)
    #[default]
    Pcm16,
    /// G.711 u-law (8-bit)
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law (8-bit)
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl RealtimeAudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    /// Get the sample rate for this format.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => 24000,
            Self::G711Ulaw | Self::G711Alaw => 8000,
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pcm16" | "pcm" | "linear16" => Self::Pcm16,
            "g711_ulaw" | "ulaw" | "mulaw" => Self::G711Ulaw,
            "g711_alaw" | "alaw" => Self::G711Alaw,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeAudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_from_url() {
        assert_eq!(
            ProviderVariant::from_url("wss://api.openai.com/v1/realtime"),
            ProviderVariant::Direct
        );
        assert_eq!(
            ProviderVariant::from_url("wss://myres.openai.azure.com/openai/realtime"),
            ProviderVariant::Azure
        );
        assert_eq!(ProviderVariant::from_url(""), ProviderVariant::Direct);
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!(ProviderVariant::parse("azure"), Some(ProviderVariant::Azure));
        assert_eq!(
            ProviderVariant::parse("OPENAI"),
            Some(ProviderVariant::Direct)
        );
        assert_eq!(ProviderVariant::parse("gemini"), None);
    }

    #[test]
    fn test_voice_parse() {
        assert_eq!(RealtimeVoice::parse("alloy"), Some(RealtimeVoice::Alloy));
        assert_eq!(RealtimeVoice::parse("SHIMMER"), Some(RealtimeVoice::Shimmer));
        assert_eq!(RealtimeVoice::parse("breeze"), Some(RealtimeVoice::Breeze));
        assert_eq!(RealtimeVoice::parse("unknown"), None);
    }

    #[test]
    fn test_voice_sets_disjoint() {
        for v in RealtimeVoice::direct_set() {
            assert!(
                !RealtimeVoice::azure_set().contains(v),
                "voice {} appears in both sets",
                v
            );
        }
    }

    #[test]
    fn test_variant_allowed_voices() {
        assert!(
            ProviderVariant::Direct
                .allowed_voices()
                .contains(&RealtimeVoice::Alloy)
        );
        assert!(
            !ProviderVariant::Direct
                .allowed_voices()
                .contains(&RealtimeVoice::Breeze)
        );
        assert!(
            ProviderVariant::Azure
                .allowed_voices()
                .contains(&RealtimeVoice::Jupiter)
        );
    }

    #[test]
    fn test_audio_format_sample_rate() {
        assert_eq!(RealtimeAudioFormat::Pcm16.sample_rate(), 24000);
        assert_eq!(RealtimeAudioFormat::G711Ulaw.sample_rate(), 8000);
    }

    #[test]
    fn test_audio_format_from_str() {
        assert_eq!(
            RealtimeAudioFormat::from_str_or_default("linear16"),
            RealtimeAudioFormat::Pcm16
        );
        assert_eq!(
            RealtimeAudioFormat::from_str_or_default("ulaw"),
            RealtimeAudioFormat::G711Ulaw
        );
    }
}
