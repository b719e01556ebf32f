use serde::Serialize;
use thiserror::Error;

/// Output vocabulary of the skin disease model, in model output order.
///
/// Names are matched byte for byte, so the odd capitalization is part of the
/// contract.
pub const CLASS_NAMES: [&str; 31] = [
    "Basal Cell Carcinoma",
    "Darier_s Disease",
    "Epidermolysis Bullosa Pruriginosa",
    "Hailey-Hailey Disease",
    "Herpes Simplex",
    "Impetigo",
    "Larva Migrans",
    "Leprosy Borderline",
    "Leprosy Lepromatous",
    "Leprosy Tuberculoid",
    "Lichen Planus",
    "Lupus Erythematosus Chronicus Discoides",
    "Melanoma",
    "Molluscum Contagiosum",
    "Mycosis Fungoides",
    "Neurofibromatosis",
    "Papilomatosis Confluentes And Reticulate",
    "Pediculosis Capitis",
    "Pityriasis Rosea",
    "Porokeratosis Actinic",
    "Psoriasis",
    "Tinea Corporis",
    "Tinea Nigra",
    "Tungiasis",
    "actinic keratosis",
    "dermatofibroma",
    "nevus",
    "pigmented benign keratosis",
    "seborrheic keratosis",
    "squamous cell carcinoma",
    "vascular lesion",
];

pub static CLASS_REGISTRY: ClassRegistry = ClassRegistry {
    names: &CLASS_NAMES,
};

#[derive(Debug, Error, PartialEq)]
pub enum LabelMismatch {
    #[error("expected {expected} labels, found {found}")]
    Count { expected: usize, found: usize },
    #[error("label {index} is '{found}', expected '{expected}'")]
    Name {
        index: usize,
        expected: &'static str,
        found: String,
    },
}

/// Ordered, immutable view over the class vocabulary.
#[derive(Debug)]
pub struct ClassRegistry {
    names: &'static [&'static str],
}

impl ClassRegistry {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }

    /// Checks that an externally supplied label list (e.g. a model's class
    /// list file) is exactly this vocabulary in this order.
    #[cfg_attr(not(feature = "tensorflow"), allow(dead_code))]
    pub fn verify_labels<S: AsRef<str>>(&self, labels: &[S]) -> Result<(), LabelMismatch> {
        if labels.len() != self.names.len() {
            return Err(LabelMismatch::Count {
                expected: self.names.len(),
                found: labels.len(),
            });
        }

        for (index, (expected, found)) in self.names.iter().zip(labels).enumerate() {
            if *expected != found.as_ref() {
                return Err(LabelMismatch::Name {
                    index,
                    expected,
                    found: found.as_ref().to_string(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiseaseInfo {
    pub description: &'static str,
    pub severity: Severity,
}

const DEFAULT_DISEASE_INFO: DiseaseInfo = DiseaseInfo {
    description: "Skin condition detected by the AI system. Please consult a doctor for an accurate diagnosis.",
    severity: Severity::Unknown,
};

/// Looks up the patient-facing description for a class label. Labels without
/// a curated entry get a generic description with unknown severity.
pub fn disease_info(label: &str) -> DiseaseInfo {
    let (description, severity) = match label {
        "Melanoma" => (
            "Melanoma is a skin cancer that develops from melanocytes. It is the most serious form of skin cancer.",
            Severity::High,
        ),
        "Basal Cell Carcinoma" => (
            "Basal cell carcinoma is the most common skin cancer. It usually grows slowly and rarely spreads.",
            Severity::Medium,
        ),
        "squamous cell carcinoma" => (
            "Squamous cell carcinoma is a skin cancer that can spread if left untreated.",
            Severity::High,
        ),
        "Psoriasis" => (
            "Psoriasis is an autoimmune disease that makes skin cells build up too quickly.",
            Severity::Medium,
        ),
        "Herpes Simplex" => (
            "Herpes simplex is a viral infection that causes blisters on the skin.",
            Severity::Low,
        ),
        "Impetigo" => (
            "Impetigo is a contagious bacterial skin infection, common in children.",
            Severity::Low,
        ),
        "Tinea Corporis" => (
            "Tinea corporis (ringworm) is a fungal infection that causes a ring-shaped rash.",
            Severity::Low,
        ),
        "nevus" => (
            "A nevus (mole) is a benign growth of pigment cells.",
            Severity::Low,
        ),
        "actinic keratosis" => (
            "Actinic keratosis is a rough patch caused by UV exposure. It can develop into cancer.",
            Severity::Medium,
        ),
        "dermatofibroma" => (
            "Dermatofibroma is a firm benign bump in the skin, usually on the legs.",
            Severity::Low,
        ),
        "pigmented benign keratosis" => (
            "Pigmented benign keratosis is a dark, non-cancerous skin growth.",
            Severity::Low,
        ),
        "seborrheic keratosis" => (
            "Seborrheic keratosis is a benign skin growth that looks like a waxy, stuck-on patch.",
            Severity::Low,
        ),
        "vascular lesion" => (
            "A vascular lesion is a blood vessel abnormality visible on the skin.",
            Severity::Low,
        ),
        "Lichen Planus" => (
            "Lichen planus is a skin inflammation that causes purplish, itchy bumps.",
            Severity::Low,
        ),
        "Pityriasis Rosea" => (
            "Pityriasis rosea is a skin rash that usually clears on its own within 6 to 8 weeks.",
            Severity::Low,
        ),
        _ => return DEFAULT_DISEASE_INFO,
    };

    DiseaseInfo {
        description,
        severity,
    }
}
