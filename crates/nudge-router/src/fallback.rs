//! Tier 3: fixed minimum-quality reminders per category.

use nudge_memory::{Category, infer_category};

/// Confidence reported for every category-fallback decision.
pub const FALLBACK_CONFIDENCE: f32 = 0.3;

const DISEASE: &[&str] = &[
    "说明典型症状、常见病因和主要治疗原则，不要给出明确诊断。",
    "提示出现哪些情况需要及时就医。",
];

const EXAMINATION: &[&str] = &[
    "说明检查目的、前期准备和注意事项，不要解读具体报告数值。",
    "提醒检查结果需由医生结合病情综合判断。",
];

const SURGERY: &[&str] = &[
    "说明手术适应证、主要风险和术后恢复要点，避免承诺手术效果。",
    "提醒是否手术及手术方式需由专科医生评估决定。",
];

const VACCINE: &[&str] = &[
    "说明适用人群、接种针次和间隔、常见不良反应及禁忌。",
    "提醒具体接种安排以当地接种门诊为准。",
];

const GENERAL: &[&str] = &[
    "回答应准确、通俗易懂，完整但简洁。",
    "不推荐具体药物剂量，说明何时需要咨询医生。",
];

/// Boilerplate reminders for `category`.
pub fn category_reminders(category: Category) -> &'static [&'static str] {
    match category {
        Category::Disease => DISEASE,
        Category::Examination => EXAMINATION,
        Category::Surgery => SURGERY,
        Category::Vaccine => VACCINE,
        Category::General => GENERAL,
    }
}

/// The hint if given, otherwise the category inferred from the question.
pub fn resolve_category(hint: Option<Category>, question: &str) -> Category {
    hint.unwrap_or_else(|| infer_category(question))
}
