//! Keyword classifiers used for symptom routing and report triage.
//!
//! Both sit behind [`TextClassifier`] so a model-backed implementation can be
//! dropped into `AppState` without touching the routes.

pub trait TextClassifier: Send + Sync {
    fn classify(&self, text: &str) -> String;
}

pub const GENERAL_PHYSICIAN: &str = "General Physician";

/// Specialties a doctor may register with, in matching priority order.
pub const SPECIALTIES: [&str; 7] = [
    "Cardiologist",
    GENERAL_PHYSICIAN,
    "Dermatologist",
    "Dentist",
    "Ophthalmologist",
    "Orthopedic",
    "Psychiatrist",
];

pub fn is_known_specialty(s: &str) -> bool {
    SPECIALTIES.contains(&s)
}

/// Ordered (specialty, keywords) table; the first rule with any substring
/// hit wins.
const SYMPTOM_RULES: &[(&str, &[&str])] = &[
    (
        "Cardiologist",
        &["chest pain", "palpitations", "shortness of breath", "hypertension", "heart"],
    ),
    (
        GENERAL_PHYSICIAN,
        &["fever", "cold", "cough", "headache", "weakness", "flu"],
    ),
    ("Dermatologist", &["skin", "rash", "acne", "itch", "eczema"]),
    ("Dentist", &["tooth", "toothache", "gum", "cavity", "dental"]),
    ("Ophthalmologist", &["eye", "blurry vision", "red eye", "eye pain"]),
    ("Orthopedic", &["back pain", "knee pain", "joint", "sprain", "fracture"]),
    ("Psychiatrist", &["anxiety", "depression", "insomnia", "stress", "mental"]),
];

pub struct KeywordSymptomClassifier {
    rules: &'static [(&'static str, &'static [&'static str])],
    fallback: &'static str,
}

impl Default for KeywordSymptomClassifier {
    fn default() -> Self {
        Self {
            rules: SYMPTOM_RULES,
            fallback: GENERAL_PHYSICIAN,
        }
    }
}

impl TextClassifier for KeywordSymptomClassifier {
    fn classify(&self, text: &str) -> String {
        let t = text.to_lowercase();
        self.rules
            .iter()
            .find(|(_, keys)| keys.iter().any(|k| t.contains(k)))
            .map(|(specialty, _)| *specialty)
            .unwrap_or(self.fallback)
            .to_string()
    }
}

pub const NO_FLAGS: &str = "Report stored. No automated flags raised.";

/// Filename heuristic; never reads the file itself.
pub struct KeywordDocumentClassifier;

impl TextClassifier for KeywordDocumentClassifier {
    fn classify(&self, file_name: &str) -> String {
        let p = file_name.to_lowercase();
        let msg = if p.contains("blood") {
            "Report suggests possible anemia - please correlate with Hb and RBC indices."
        } else if p.contains("xray") {
            "X-ray hints at possible fracture; recommend orthopedic evaluation."
        } else if p.contains("ecg") {
            "ECG pattern may indicate arrhythmia; cardiology consult advised."
        } else {
            NO_FLAGS
        };
        msg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symptoms(text: &str) -> String {
        KeywordSymptomClassifier::default().classify(text)
    }

    #[test]
    fn first_matching_rule_wins() {
        assert_eq!(symptoms("I have chest pain and fever"), "Cardiologist");
        assert_eq!(symptoms("fever with an itchy rash"), GENERAL_PHYSICIAN);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(symptoms("Severe TOOTHACHE since monday"), "Dentist");
        assert_eq!(symptoms("Knee Pain after running"), "Orthopedic");
        assert_eq!(symptoms("can't sleep, insomnia"), "Psychiatrist");
    }

    #[test]
    fn unmatched_text_falls_back() {
        assert_eq!(symptoms("feeling odd"), GENERAL_PHYSICIAN);
        assert_eq!(symptoms(""), GENERAL_PHYSICIAN);
    }

    #[test]
    fn table_specialties_are_registrable() {
        let c = KeywordSymptomClassifier::default();
        assert!(c.rules.iter().all(|(s, _)| is_known_specialty(s)));
        assert!(!is_known_specialty("Astrologer"));
    }

    #[test]
    fn document_flags_by_filename() {
        let c = KeywordDocumentClassifier;
        assert!(c.classify("patient_bloodtest.pdf").contains("anemia"));
        assert!(c.classify("uploads/171_Chest_XRAY.png").contains("fracture"));
        assert!(c.classify("ecg-2024.pdf").contains("arrhythmia"));
        assert_eq!(c.classify("report.pdf"), NO_FLAGS);
    }
}
