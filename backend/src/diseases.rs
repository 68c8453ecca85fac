//! Static guidance for the disease classes the model knows about.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiseaseClass {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub treatment: &'static str,
}

/// Ordered as the model's output vector.
pub const DISEASES: [DiseaseClass; 3] = [
    DiseaseClass {
        id: "Potato___Early_blight",
        name: "Early Blight",
        description: "Early blight is a common fungal disease that causes dark, concentric lesions on older leaves and tubers. It spreads quickly in warm, wet conditions.",
        treatment: "Remove and destroy infected leaves, avoid overhead irrigation, rotate crops, and apply appropriate fungicides (e.g., chlorothalonil or mancozeb) following label instructions.",
    },
    DiseaseClass {
        id: "Potato___Late_blight",
        name: "Late Blight",
        description: "Late blight is a serious disease caused by Phytophthora infestans; it causes water-soaked lesions that rapidly turn brown and can destroy plants and tubers.",
        treatment: "Immediately remove and destroy infected plants. Use certified disease-free seed, improve air circulation, avoid overhead watering, and apply recommended fungicides (e.g., mancozeb, copper-based products) as advised by local extension services.",
    },
    DiseaseClass {
        id: "Potato___healthy",
        name: "Healthy",
        description: "No disease detected. The plant appears healthy.",
        treatment: "Maintain good cultural practices: crop rotation, balanced fertilization, adequate watering, and monitor regularly for signs of disease.",
    },
];

pub const NO_DESCRIPTION: &str = "No information available.";
pub const NO_TREATMENT: &str = "No treatment information available.";

pub fn default_labels() -> Vec<String> {
    DISEASES.iter().map(|d| d.id.to_string()).collect()
}

pub fn lookup(id: &str) -> Option<&'static DiseaseClass> {
    DISEASES.iter().find(|d| d.id == id)
}

/// What the result page says about a predicted label.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiseaseReport {
    pub name: String,
    pub description: String,
    pub treatment: String,
}

impl DiseaseReport {
    /// Unknown labels still get a report: the label itself as the name and
    /// placeholder guidance.
    pub fn for_label(label: &str) -> Self {
        match lookup(label) {
            Some(class) => DiseaseReport {
                name: class.name.to_string(),
                description: class.description.to_string(),
                treatment: class.treatment.to_string(),
            },
            None => DiseaseReport {
                name: label.to_string(),
                description: NO_DESCRIPTION.to_string(),
                treatment: NO_TREATMENT.to_string(),
            },
        }
    }
}
