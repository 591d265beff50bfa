//! Turns retrieved candidates into structured recommendations via the LLM,
//! with a deterministic fallback that cannot fail.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::records::{DoctorMatch, MedicineMatch};
use crate::llm::CompletionModel;
use crate::models::UserPreferences;

/// Candidates listed in the prompt, in the order supplied.
pub const MAX_PROMPT_CANDIDATES: usize = 10;
/// Entries produced by the fallback.
pub const MAX_FALLBACK_ENTRIES: usize = 5;

pub const GENERIC_ADVICE: &str =
    "Please consult a healthcare professional for proper diagnosis and treatment.";
const MEDICINE_SEE_DOCTOR: &str = "If symptoms persist or worsen, consult a doctor immediately.";
const MEDICINE_EMERGENCY: &str = "Seek immediate medical attention for severe symptoms.";
const DOCTOR_SEE_DOCTOR: &str = "Schedule an appointment as soon as possible.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet<R> {
    #[serde(default = "Vec::new")]
    pub recommendations: Vec<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_advice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_to_see_doctor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency_level: Option<String>,
}

impl<R> Default for RecommendationSet<R> {
    fn default() -> Self {
        Self {
            recommendations: Vec::new(),
            general_advice: None,
            when_to_see_doctor: None,
            emergency_warning: None,
            urgency_level: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicineRecommendation {
    pub medicine_id: Option<String>,
    pub medicine_name: String,
    pub reasoning: String,
    pub prescription_required: bool,
    pub price: f64,
    pub discount: f64,
    pub safety_rating: String,
    pub warnings: Vec<String>,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorRecommendation {
    pub doctor_id: Option<String>,
    pub doctor_name: String,
    pub specialization: String,
    pub experience_years: i64,
    pub patient_satisfaction: f64,
    pub consultation_fee: f64,
    pub location: String,
    pub reasoning: String,
    pub qualifications: Vec<String>,
    pub availability: String,
}

/// User-supplied constraints rendered into the prompt.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub preferences: UserPreferences,
    pub location: Option<String>,
}

/// A retrieved record that can be recommended.
pub trait Candidate: Sized {
    type Recommendation: DeserializeOwned + Send;

    fn prompt_entry(&self, position: usize) -> String;

    fn build_prompt(query: &str, candidates: &str, constraints: &Constraints) -> String;

    /// Entry built from indexed fields only.
    fn fallback_entry(&self) -> Self::Recommendation;

    fn fallback_set() -> RecommendationSet<Self::Recommendation>;

    /// Ties an LLM entry back to its candidate and overwrites the fields the
    /// index is authoritative for. Returns false when no candidate matches.
    fn reconcile(candidates: &[Self], recommendation: &mut Self::Recommendation) -> bool;
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn strip_title(name: &str) -> &str {
    let trimmed = name.trim();
    trimmed
        .strip_prefix("Dr. ")
        .or_else(|| trimmed.strip_prefix("Dr "))
        .unwrap_or(trimmed)
}

impl Candidate for MedicineMatch {
    type Recommendation = MedicineRecommendation;

    fn prompt_entry(&self, position: usize) -> String {
        let category = if self.drug_category.is_empty() {
            "Unknown"
        } else {
            &self.drug_category
        };
        let description = if self.document.is_empty() {
            "No description available"
        } else {
            &self.document
        };
        format!(
            "{}. {} (id: {})\n   - Price: {} PKR\n   - Discount: {}%\n   - Prescription Required: {}\n   - Category: {}\n   - Stock: {}\n   - Description: {}\n   - Similarity Score: {:.2}",
            position,
            self.medicine_name,
            self.id,
            self.price,
            self.discount,
            self.prescription_required,
            category,
            self.stock,
            description,
            self.similarity_score
        )
    }

    fn build_prompt(query: &str, candidates: &str, constraints: &Constraints) -> String {
        format!(
            r#"You are a medical AI assistant that helps patients find appropriate medicines based on their symptoms.
You have access to a database of medicines and should provide helpful, safe recommendations.

PATIENT SYMPTOMS: {query}

AVAILABLE MEDICINES:
{candidates}

USER PREFERENCES:
{preferences}

Please analyze the symptoms and provide recommendations following these guidelines:

1. SAFETY FIRST: Only recommend medicines that are appropriate for the described symptoms
2. PRESCRIPTION REQUIREMENTS: Clearly indicate if a medicine requires a prescription
3. PRIORITIZE: Rank medicines by relevance to symptoms and safety
4. EXPLAIN: Provide clear reasoning for each recommendation
5. WARNINGS: Include any important warnings or side effects
6. ALTERNATIVES: Suggest alternatives if available

Only recommend medicines from the list above and copy their id into "medicine_id".
Respond with a single JSON object with the following structure:
{{
    "recommendations": [
        {{
            "medicine_id": "id from the list",
            "medicine_name": "Medicine Name",
            "reasoning": "Why this medicine is recommended",
            "prescription_required": true,
            "price": 100.0,
            "discount": 10.0,
            "safety_rating": "high/medium/low",
            "warnings": ["warning1", "warning2"],
            "alternatives": ["alt1", "alt2"]
        }}
    ],
    "general_advice": "General health advice for these symptoms",
    "when_to_see_doctor": "When the patient should consult a doctor",
    "emergency_warning": "Any emergency situations to watch for"
}}

IMPORTANT:
- Be conservative with recommendations
- Always emphasize consulting a doctor for serious symptoms
- Don't recommend prescription medicines without proper medical consultation
- Consider the patient's budget and preferences
"#,
            query = query,
            candidates = candidates,
            preferences = preferences_context(&constraints.preferences),
        )
    }

    fn fallback_entry(&self) -> MedicineRecommendation {
        MedicineRecommendation {
            medicine_id: Some(self.id.clone()),
            medicine_name: self.medicine_name.clone(),
            reasoning: format!("Based on similarity score: {:.2}", self.similarity_score),
            prescription_required: self.prescription_required,
            price: self.price,
            discount: self.discount,
            safety_rating: "medium".to_string(),
            warnings: vec!["Consult a doctor before use".to_string()],
            alternatives: Vec::new(),
        }
    }

    fn fallback_set() -> RecommendationSet<MedicineRecommendation> {
        RecommendationSet {
            general_advice: Some(GENERIC_ADVICE.to_string()),
            when_to_see_doctor: Some(MEDICINE_SEE_DOCTOR.to_string()),
            emergency_warning: Some(MEDICINE_EMERGENCY.to_string()),
            ..Default::default()
        }
    }

    fn reconcile(candidates: &[Self], rec: &mut MedicineRecommendation) -> bool {
        let found = rec
            .medicine_id
            .as_deref()
            .and_then(|id| candidates.iter().find(|c| c.id == id))
            .or_else(|| {
                candidates
                    .iter()
                    .find(|c| same_name(&c.medicine_name, &rec.medicine_name))
            });

        let Some(candidate) = found else {
            return false;
        };
        rec.medicine_id = Some(candidate.id.clone());
        if rec.medicine_name.trim().is_empty() {
            rec.medicine_name = candidate.medicine_name.clone();
        }
        rec.prescription_required = candidate.prescription_required;
        rec.price = candidate.price;
        rec.discount = candidate.discount;
        true
    }
}

impl Candidate for DoctorMatch {
    type Recommendation = DoctorRecommendation;

    fn prompt_entry(&self, position: usize) -> String {
        let specializations = if self.specializations().is_empty() {
            "Not specified".to_string()
        } else {
            self.specializations().join(", ")
        };
        let location = if self.address.is_empty() {
            "Address not available"
        } else {
            &self.address
        };
        format!(
            "{}. {} (id: {})\n   - Specializations: {}\n   - Experience: {} years\n   - Patient Satisfaction: {}%\n   - Consultation Fee: {} PKR\n   - Location: {}\n   - Similarity Score: {:.2}",
            position,
            self.display_name(),
            self.id,
            specializations,
            self.experience_years,
            self.patient_satisfaction_rate,
            self.fee_pkr,
            location,
            self.similarity_score
        )
    }

    fn build_prompt(query: &str, candidates: &str, constraints: &Constraints) -> String {
        format!(
            r#"You are a medical AI assistant that helps patients find appropriate doctors based on their symptoms and needs.

PATIENT SYMPTOMS: {query}
USER LOCATION: {location}

AVAILABLE DOCTORS:
{candidates}

Please analyze the symptoms and provide doctor recommendations following these guidelines:

1. SPECIALIZATION MATCH: Recommend doctors whose specializations match the symptoms
2. EXPERIENCE: Consider years of experience
3. SATISFACTION: Prioritize doctors with higher patient satisfaction rates
4. LOCATION: Consider proximity if location is provided
5. EXPLAIN: Provide clear reasoning for each recommendation

Only recommend doctors from the list above and copy their id into "doctor_id".
Respond with a single JSON object with the following structure:
{{
    "recommendations": [
        {{
            "doctor_id": "id from the list",
            "doctor_name": "Dr. First Last",
            "specialization": "Cardiology",
            "experience_years": 10,
            "patient_satisfaction": 95.5,
            "consultation_fee": 2000.0,
            "location": "Hospital Address",
            "reasoning": "Why this doctor is recommended",
            "qualifications": ["MBBS", "MD"],
            "availability": "Available"
        }}
    ],
    "urgency_level": "low/medium/high",
    "general_advice": "General advice for these symptoms",
    "when_to_see_doctor": "When to schedule an appointment"
}}

IMPORTANT:
- Only recommend doctors whose specializations are relevant to the symptoms
- Consider the patient's location and budget
- Provide clear reasoning for each recommendation
"#,
            query = query,
            location = constraints.location.as_deref().unwrap_or("Not specified"),
            candidates = candidates,
        )
    }

    fn fallback_entry(&self) -> DoctorRecommendation {
        DoctorRecommendation {
            doctor_id: Some(self.id.clone()),
            doctor_name: self.display_name(),
            specialization: self.specializations().join(", "),
            experience_years: self.experience_years,
            patient_satisfaction: self.patient_satisfaction_rate,
            consultation_fee: self.fee_pkr,
            location: if self.address.is_empty() {
                "Address not available".to_string()
            } else {
                self.address.clone()
            },
            reasoning: format!("Based on similarity score: {:.2}", self.similarity_score),
            qualifications: self.qualifications.clone(),
            availability: "Contact for availability".to_string(),
        }
    }

    fn fallback_set() -> RecommendationSet<DoctorRecommendation> {
        RecommendationSet {
            urgency_level: Some("medium".to_string()),
            general_advice: Some(GENERIC_ADVICE.to_string()),
            when_to_see_doctor: Some(DOCTOR_SEE_DOCTOR.to_string()),
            ..Default::default()
        }
    }

    fn reconcile(candidates: &[Self], rec: &mut DoctorRecommendation) -> bool {
        let found = rec
            .doctor_id
            .as_deref()
            .and_then(|id| candidates.iter().find(|c| c.id == id))
            .or_else(|| {
                candidates.iter().find(|c| {
                    same_name(strip_title(&c.display_name()), strip_title(&rec.doctor_name))
                })
            });

        let Some(candidate) = found else {
            return false;
        };
        rec.doctor_id = Some(candidate.id.clone());
        if rec.doctor_name.trim().is_empty() {
            rec.doctor_name = candidate.display_name();
        }
        if rec.specialization.trim().is_empty() {
            rec.specialization = candidate.specializations().join(", ");
        }
        rec.experience_years = candidate.experience_years;
        rec.patient_satisfaction = candidate.patient_satisfaction_rate;
        rec.consultation_fee = candidate.fee_pkr;
        true
    }
}

pub fn preferences_context(preferences: &UserPreferences) -> String {
    let mut lines = Vec::new();
    if let Some(budget) = preferences.budget.filter(|b| *b > 0.0) {
        lines.push(format!("Budget: {} PKR", budget));
    }
    match preferences.prescription_preference {
        Some(true) => lines.push("Prescription Preference: prescription medicines allowed".to_string()),
        Some(false) => lines.push("Prescription Preference: over-the-counter only".to_string()),
        None => {}
    }
    if let Some(category) = preferences
        .category_preference
        .as_deref()
        .filter(|c| !c.is_empty())
    {
        lines.push(format!("Category Preference: {}", category));
    }

    if lines.is_empty() {
        "No specific preferences provided".to_string()
    } else {
        lines.join("\n")
    }
}

/// The text between the first `{` and the last `}`, inclusive.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_recommendations<R: DeserializeOwned>(text: &str) -> Result<RecommendationSet<R>> {
    let json = extract_json_object(text).context("response contains no JSON object")?;
    serde_json::from_str(json).context("response JSON does not match the schema")
}

/// Deterministic recommendations from the first candidates, in given order.
pub fn fallback_recommendations<C: Candidate>(candidates: &[C]) -> RecommendationSet<C::Recommendation> {
    let mut set = C::fallback_set();
    set.recommendations = candidates
        .iter()
        .take(MAX_FALLBACK_ENTRIES)
        .map(C::fallback_entry)
        .collect();
    set
}

#[derive(Clone)]
pub struct RecommendationGenerator {
    llm: Arc<dyn CompletionModel>,
}

impl RecommendationGenerator {
    pub fn new(llm: Arc<dyn CompletionModel>) -> Self {
        Self { llm }
    }

    pub fn llm(&self) -> &Arc<dyn CompletionModel> {
        &self.llm
    }

    /// Callers pre-sort `candidates`; only the first ten reach the prompt.
    pub async fn recommend<C>(
        &self,
        query: &str,
        candidates: &[C],
        constraints: &Constraints,
    ) -> RecommendationSet<C::Recommendation>
    where
        C: Candidate + Sync,
    {
        if candidates.is_empty() {
            return fallback_recommendations(candidates);
        }

        let context = candidates
            .iter()
            .take(MAX_PROMPT_CANDIDATES)
            .enumerate()
            .map(|(i, c)| c.prompt_entry(i + 1))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = C::build_prompt(query, &context, constraints);

        let parsed = match self.llm.complete(&prompt).await {
            Ok(text) => parse_recommendations::<C::Recommendation>(&text),
            Err(e) => Err(anyhow::Error::from(e)),
        };

        match parsed {
            Ok(mut set) => {
                let before = set.recommendations.len();
                set.recommendations
                    .retain_mut(|rec| C::reconcile(candidates, rec));
                if set.recommendations.len() < before {
                    tracing::debug!(
                        "Dropped {} recommendation(s) not matching any candidate",
                        before - set.recommendations.len()
                    );
                }
                set
            }
            Err(e) => {
                tracing::warn!("Falling back to rule-based recommendations: {:#}", e);
                fallback_recommendations(candidates)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|_| LlmError::EmptyResponse)
        }
    }

    fn medicine(id: &str, name: &str, rx: bool, score: f64) -> MedicineMatch {
        MedicineMatch {
            id: id.to_string(),
            medicine_name: name.to_string(),
            price: 100.0,
            discount: 0.0,
            prescription_required: rx,
            drug_category: "Analgesic".to_string(),
            stock: 5,
            similarity_score: score,
            document: format!("Medicine: {}", name),
        }
    }

    fn doctor(id: &str, first: &str, last: &str) -> DoctorMatch {
        DoctorMatch {
            id: id.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            specialization_ids: vec!["3".to_string()],
            specialization_names: vec!["Neurology".to_string()],
            qualifications: vec!["MBBS".to_string()],
            experience_years: 8,
            patient_satisfaction_rate: 88.0,
            fee_pkr: 3000.0,
            address: String::new(),
            similarity_score: 0.61,
            document: String::new(),
        }
    }

    fn many_medicines(n: usize) -> Vec<MedicineMatch> {
        (0..n)
            .map(|i| medicine(&format!("m{}", i), &format!("Med {}", i), false, 0.9))
            .collect()
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("Sure! ```json\n{\"a\": {\"b\": 1}}\n``` done"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[tokio::test]
    async fn test_non_json_reply_falls_back_in_candidate_order() {
        let llm = Arc::new(ScriptedLlm::replying("I cannot help with that."));
        let generator = RecommendationGenerator::new(llm);
        let candidates = many_medicines(7);

        let set = generator
            .recommend("headache", &candidates, &Constraints::default())
            .await;

        assert_eq!(set.recommendations.len(), MAX_FALLBACK_ENTRIES);
        for (rec, candidate) in set.recommendations.iter().zip(&candidates) {
            assert_eq!(rec.medicine_id.as_deref(), Some(candidate.id.as_str()));
            assert_eq!(rec.reasoning, "Based on similarity score: 0.90");
        }
        assert_eq!(set.general_advice.as_deref(), Some(GENERIC_ADVICE));
        assert!(set.emergency_warning.is_some());
    }

    #[tokio::test]
    async fn test_llm_error_falls_back() {
        let generator = RecommendationGenerator::new(Arc::new(ScriptedLlm::failing()));
        let candidates = vec![doctor("d1", "Sara", "Ali")];
        let set = generator
            .recommend("migraine", &candidates, &Constraints::default())
            .await;
        assert_eq!(set.recommendations.len(), 1);
        assert_eq!(set.recommendations[0].doctor_name, "Dr. Sara Ali");
        assert_eq!(set.recommendations[0].specialization, "Neurology");
        assert_eq!(set.recommendations[0].location, "Address not available");
        assert_eq!(set.urgency_level.as_deref(), Some("medium"));
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_the_llm() {
        let llm = Arc::new(ScriptedLlm::replying("{}"));
        let generator = RecommendationGenerator::new(llm.clone());
        let set = generator
            .recommend::<MedicineMatch>("fever", &[], &Constraints::default())
            .await;
        assert!(set.recommendations.is_empty());
        assert_eq!(set.general_advice.as_deref(), Some(GENERIC_ADVICE));
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_lists_at_most_ten_candidates() {
        let llm = Arc::new(ScriptedLlm::replying("nope"));
        let generator = RecommendationGenerator::new(llm.clone());
        let constraints = Constraints {
            preferences: UserPreferences {
                budget: Some(500.0),
                prescription_preference: Some(false),
                category_preference: None,
            },
            location: None,
        };
        generator
            .recommend("fever", &many_medicines(12), &constraints)
            .await;

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("10. Med 9"));
        assert!(!prompts[0].contains("11. Med 10"));
        assert!(prompts[0].contains("Budget: 500 PKR"));
        assert!(prompts[0].contains("Prescription Preference: over-the-counter only"));
    }

    #[tokio::test]
    async fn test_llm_answer_is_reconciled_with_candidates() {
        let reply = r#"Here you go:
{
  "recommendations": [
    {"medicine_name": "panadol", "reasoning": "fever", "prescription_required": true, "price": 1.0},
    {"medicine_id": "m-rx", "medicine_name": "Augmentin", "reasoning": "infection"},
    {"medicine_name": "Invented Pill", "reasoning": "?"}
  ],
  "general_advice": "Rest and hydrate",
  "emergency_warning": "High fever over 3 days"
}"#;
        let generator = RecommendationGenerator::new(Arc::new(ScriptedLlm::replying(reply)));
        let candidates = vec![
            medicine("m-otc", "Panadol", false, 0.8),
            medicine("m-rx", "Augmentin", true, 0.4),
        ];

        let set = generator
            .recommend("fever", &candidates, &Constraints::default())
            .await;

        assert_eq!(set.recommendations.len(), 2);
        let panadol = &set.recommendations[0];
        assert_eq!(panadol.medicine_id.as_deref(), Some("m-otc"));
        assert!(!panadol.prescription_required);
        assert_eq!(panadol.price, 100.0);
        assert!(set.recommendations[1].prescription_required);
        assert_eq!(set.general_advice.as_deref(), Some("Rest and hydrate"));
    }

    #[tokio::test]
    async fn test_doctor_names_match_with_or_without_title() {
        let reply = r#"{"recommendations": [{"doctor_name": "sara ali", "specialization": "Neurology"}],
                        "urgency_level": "high"}"#;
        let generator = RecommendationGenerator::new(Arc::new(ScriptedLlm::replying(reply)));
        let constraints = Constraints {
            location: Some("Lahore".to_string()),
            ..Default::default()
        };
        let set = generator
            .recommend("migraine", &[doctor("d1", "Sara", "Ali")], &constraints)
            .await;

        assert_eq!(set.recommendations.len(), 1);
        assert_eq!(set.recommendations[0].doctor_id.as_deref(), Some("d1"));
        assert_eq!(set.recommendations[0].patient_satisfaction, 88.0);
        assert_eq!(set.urgency_level.as_deref(), Some("high"));
    }

    #[test]
    fn test_schema_mismatch_is_an_error() {
        let result = parse_recommendations::<MedicineRecommendation>(
            r#"{"recommendations": "none"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_preferences_context() {
        assert_eq!(
            preferences_context(&UserPreferences::default()),
            "No specific preferences provided"
        );
        let prefs = UserPreferences {
            budget: None,
            prescription_preference: None,
            category_preference: Some("Pain Relief".to_string()),
        };
        assert_eq!(preferences_context(&prefs), "Category Preference: Pain Relief");
    }
}
