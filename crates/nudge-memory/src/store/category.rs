//! Keyword-based category inference for pattern descriptions.

use crate::types::Category;

/// Keyword sets in priority order. The first category with any hit wins.
const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Disease,
        &[
            "疾病", "症状", "病因", "治疗", "并发症", "诊断", "病理", "临床表现", "发病", "预后",
            "康复", "用药", "药物", "病变", "糖尿病", "高血压", "损伤", "炎症", "感染",
        ],
    ),
    (
        Category::Examination,
        &[
            "检查", "超声", "ct", "mri", "x线", "x光", "影像", "化验", "b超", "彩超", "心电图",
            "血常规", "尿检", "内窥镜", "穿刺",
        ],
    ),
    (
        Category::Surgery,
        &[
            "手术", "术后", "麻醉", "切除", "切开", "缝合", "植入", "关节镜", "微创", "开放性",
            "术前", "手术方式", "手术指征",
        ],
    ),
    (
        Category::Vaccine,
        &[
            "疫苗", "接种", "免疫", "注射", "预防接种", "抗体", "破伤风针", "hpv", "流感", "肺炎",
            "乙肝", "甲肝",
        ],
    ),
];

/// Infer the category of `text` from keywords.
///
/// Priority is disease > examination > surgery > vaccine; `General` when no
/// keyword matches. Matching is case-insensitive for the Latin keywords.
pub fn infer_category(text: &str) -> Category {
    let lowered = text.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(category, _)| *category)
        .unwrap_or(Category::General)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_category() {
        assert_eq!(infer_category("未说明糖尿病的并发症"), Category::Disease);
        assert_eq!(infer_category("MRI 前需去除金属物品"), Category::Examination);
        assert_eq!(infer_category("遗漏了术后护理要点"), Category::Surgery);
        assert_eq!(infer_category("HPV 接种年龄说明错误"), Category::Vaccine);
    }

    #[test]
    fn test_priority_order() {
        // disease beats vaccine
        assert_eq!(infer_category("疫苗接种后感染的处理"), Category::Disease);
        // examination beats surgery
        assert_eq!(infer_category("手术前的检查项目不全"), Category::Examination);
        // surgery beats vaccine
        assert_eq!(infer_category("麻醉与注射的区别"), Category::Surgery);
    }

    #[test]
    fn test_general_when_nothing_matches() {
        assert_eq!(infer_category("回答过于简略"), Category::General);
        assert_eq!(infer_category(""), Category::General);
    }
}
