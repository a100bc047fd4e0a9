use std::collections::HashMap;

pub const HEALTHY_LABEL: &str = "healthy";

/// Treatment advice attached to one disease label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemedyRecord {
    pub sinhala_advice: &'static str,
    pub english_advice: &'static str,
    pub organic_remedy: &'static str,
    pub chemical_remedy: &'static str,
}

/// Immutable label -> remedy mapping.
///
/// The `healthy` record is held apart from the disease entries so every
/// lookup has something to fall back to.
#[derive(Debug, Clone)]
pub struct RemedyTable {
    healthy: RemedyRecord,
    diseases: HashMap<&'static str, RemedyRecord>,
}

impl RemedyTable {
    pub fn new(
        healthy: RemedyRecord,
        diseases: impl IntoIterator<Item = (&'static str, RemedyRecord)>,
    ) -> Self {
        let diseases = diseases
            .into_iter()
            .filter(|(label, _)| *label != HEALTHY_LABEL)
            .collect();

        RemedyTable { healthy, diseases }
    }

    /// Tea leaf diseases the detector was trained on.
    pub fn builtin() -> Self {
        let healthy = RemedyRecord {
            sinhala_advice: "ශාකය නිරෝගීයි. දිගටම හොඳින් නඩත්තු කරන්න.",
            english_advice: "Plant is healthy. Keep good maintenance.",
            organic_remedy: "කොම්පෝස්ට් පොහොර යොදන්න.",
            chemical_remedy: "NPK සමබර පොහොර යොදන්න",
        };

        RemedyTable::new(
            healthy,
            [
                (
                    "blister_blight",
                    RemedyRecord {
                        sinhala_advice: "කොපර් ඔක්සික්ලෝරයිඩ් හෝ මැන්කොසෙබ් භාවිතා කරන්න.",
                        english_advice: "Use Copper oxychloride or Mancozeb fungicide.",
                        organic_remedy: "නීම් තෙල් (Neem Oil) ස්ප්‍රේ කරන්න.",
                        chemical_remedy: "Copper based fungicides",
                    },
                ),
                (
                    "gray_blight",
                    RemedyRecord {
                        sinhala_advice: "කැබෙන්ඩාසින් හෝ හෙක්සාකොනාසෝල් භාවිතා කරන්න.",
                        english_advice: "Use Carbendazim or Hexaconazole.",
                        organic_remedy: "සුදුළූණු සහ නීම් සාරය (Garlic + Neem) ස්ප්‍රේ කරන්න.",
                        chemical_remedy: "Carbendazim",
                    },
                ),
                (
                    "brown_blight",
                    RemedyRecord {
                        sinhala_advice: "මැන්කොසෙබ් හෝ ක්ලොරොතැලෝනිල් භාවිතා කරන්න.",
                        english_advice: "Use Mancozeb or Chlorothalonil.",
                        organic_remedy: "බේකින් සෝඩා මිශ්‍ර ජලය ස්ප්‍රේ කරන්න.",
                        chemical_remedy: "Mancozeb",
                    },
                ),
                (
                    "red_rust",
                    RemedyRecord {
                        sinhala_advice: "කොපර් හයිඩ්‍රොක්සයිඩ් භාවිතා කරන්න.",
                        english_advice: "Use Copper hydroxide.",
                        organic_remedy: "සබන් මිශ්‍ර නීම් තෙල් ස්ප්‍රේ කරන්න.",
                        chemical_remedy: "Copper hydroxide",
                    },
                ),
            ],
        )
    }

    /// Record for `label`, or the healthy record when the label is unknown.
    pub fn lookup(&self, label: &str) -> &RemedyRecord {
        self.diseases.get(label).unwrap_or(&self.healthy)
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(HEALTHY_LABEL).chain(self.diseases.keys().copied())
    }

    pub fn label_count(&self) -> usize {
        self.diseases.len() + 1
    }
}
