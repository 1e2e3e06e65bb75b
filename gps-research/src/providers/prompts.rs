//! Prompt templates and builders.
//!
//! The research and validation templates can be replaced from files; the
//! decomposed student/GPU prompts and the merge prompt are fixed.

use crate::error::Result;
use crate::record::{ProviderResult, ResearchRecord};

/// Placeholder replaced with the entity name in research templates.
pub const ENTITY_PLACEHOLDER: &str = "{{UNIVERSITY_NAME}}";

/// Built-in research template, used when no prompt file is configured.
pub const DEFAULT_RESEARCH_TEMPLATE: &str = r#"You are a research analyst estimating the dedicated GPU compute available to computer science students at {{UNIVERSITY_NAME}}.

Search the web for current, verifiable information and report ONLY what the university itself owns or operates.

## STUDENT DATA
Find the most recent CS enrollment figures (prefer Fall 2024 / AY 2024-25, fall back to 2023 and note it):
- Undergraduate CS majors
- MS / Masters CS students (exclude PhD students)
- PhD CS students
Good sources: Common Data Set, institutional research factbooks, department "About" pages, graduate admissions statistics.

## GPU RESOURCES
Find the university's research computing / HPC clusters and count GPUs by model.
For each cluster: nodes x GPUs per node = total. Add up ALL clusters.
Do NOT count national or shared resources (ACCESS, NAIRR, NERSC, DOE labs, consortium machines the university does not own).

## COMPUTE CREDITS
Estimate the annual USD value of cloud credits or external allocations dedicated to the university, or 0.

## OUTPUT
Return ONLY a JSON object with this structure (use 0 for unknown counts):
```json
{
  "university_name": "{{UNIVERSITY_NAME}}",
  "data_retrieved_date": "YYYY-MM-DD",
  "sources": [
    {"url": "<url>", "description": "<what this page provided>"}
  ],
  "student_data": {
    "undergrad_cs_count": 0,
    "grad_cs_count": 0,
    "phd_cs_count": 0,
    "year": "<e.g. Fall 2024>",
    "source_url": "<url>",
    "notes": "<source and any estimation>"
  },
  "gpu_resources": {
    "h100_sxm_count": 0,
    "h100_pcie_count": 0,
    "h200_count": 0,
    "gh200_count": 0,
    "b200_count": 0,
    "b100_count": 0,
    "a100_80gb_count": 0,
    "a100_40gb_count": 0,
    "a40_count": 0,
    "a6000_count": 0,
    "l40s_count": 0,
    "v100_count": 0,
    "p100_count": 0,
    "other_high_vram_gpus": [],
    "source_url": "<url>",
    "notes": "<per-cluster calculation>"
  },
  "compute_credits": {
    "total_annual_value_usd": 0,
    "description": "<what the credits are>"
  },
  "analysis_notes": "<overall caveats>"
}
```
"#;

/// Built-in validation template, used when no validation prompt file is configured.
pub const DEFAULT_VALIDATION_TEMPLATE: &str = r#"You are auditing a GPU inventory for a single university.

Your job is to remove GPUs that do NOT belong to the university itself:
- National facilities and allocations (ACCESS/XSEDE, NAIRR, NERSC, Oak Ridge, Argonne, other DOE labs)
- Multi-institution consortium or state-wide systems the university does not own
- Commercial cloud capacity (this belongs in compute_credits, not gpu_resources)
- Double counting of the same cluster described on two pages

Rules:
- Only lower GPU counts; never raise them.
- Do not touch student_data.
- Explain every change in a "validation_notes" string. If nothing changes, set it to "No changes needed".
"#;

/// Research prompt for one entity.
pub fn render_research(template: &str, entity: &str) -> String {
    template.replace(ENTITY_PLACEHOLDER, entity)
}

fn first_word_lower(entity: &str) -> String {
    entity
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// First half of the decomposed query: CS enrollment only.
pub fn student_prompt(entity: &str) -> String {
    let domain_hint = first_word_lower(entity);
    format!(
        r#"Find CURRENT CS student enrollment data for {entity}.

## DATE REQUIREMENTS
1. **Best**: 2024-2025, Fall 2024, or AY 2024-25.
2. **Acceptable Fallback**: 2023-2024, Fall 2023. Explicitly note this as "[2023 DATA]" in the notes.
3. **Emergency Fallback**: 2022-2023, Fall 2022. Only use if absolutely nothing newer exists. Note as "[2022 DATA]".

## Search Strategy
Search in this order:
1. "{entity} computer science enrollment Fall 2024"
2. "{entity} computer science enrollment Fall 2023"
3. "{entity} Common Data Set 2023-2024" (or 2024-2025)
4. "{entity} registrar enrollment statistics"
5. site:cs.{domain_hint}.edu enrollment

## Where to Look
- **Common Data Set** (Section B or J)
- **University Factbook** / Institutional Research (IR) dashboards
- **CS Department "About"** pages
- **Graduate school** admissions statistics

## Return Format
Return JSON ONLY:
{{
  "undergrad_cs_count": <number or 0>,
  "grad_cs_count": <MS/Masters students ONLY, number or 0>,
  "phd_cs_count": <PhD students ONLY, number or 0>,
  "year": "<e.g. 'Fall 2024', 'Fall 2023'>",
  "source_url": "<URL where you found this data>",
  "notes": "<explain source and any estimations/assumptions>"
}}

## If You Cannot Find Specific Breakdowns
- If you only find "Total CS Students", estimate: Undergraduate ~70%, MS ~20%, PhD ~10%.
- Note this estimation in the 'notes' field.
"#
    )
}

/// Second half of the decomposed query: GPU inventory only.
pub fn gpu_prompt(entity: &str) -> String {
    format!(
        r#"Find GPU cluster specifications for {entity}.

Search for:
- "{entity} research computing GPU clusters"
- "{entity} HPC H100 A100 specifications"
- "{entity} AI computing infrastructure"

For EACH cluster found, calculate: nodes * GPUs_per_node = total

Return JSON ONLY:
{{
  "h100_sxm_count": <total H100 SXM GPUs>,
  "h100_pcie_count": <total H100 PCIe GPUs>,
  "h200_count": <total>,
  "a100_80gb_count": <total>,
  "a100_40gb_count": <total>,
  "v100_count": <total>,
  "p100_count": <total>,
  "a6000_count": <total>,
  "l40s_count": <total>,
  "b100_count": 0,
  "b200_count": 0,
  "gh200_count": 0,
  "a40_count": 0,
  "other_high_vram_gpus": [],
  "source_url": "<main source URL>",
  "sources": [
    {{"url": "<url1>", "data_found": "<what you found>"}},
    {{"url": "<url2>", "data_found": "<what you found>"}}
  ],
  "notes": "<calculation breakdown>"
}}

IMPORTANT: Add up ALL clusters. If you cannot determine model, estimate based on cluster age (older=V100, newer=A100/H100)."#
    )
}

/// Merge prompt embedding every successful provider result.
pub fn merge_prompt(entity: &str, results: &[ProviderResult]) -> Result<String> {
    let mut prompt = format!(
        r#"You are aggregating research results about {entity} from multiple AI models.

Each model searched the web independently. Your task is to merge their findings into a single, accurate JSON.

## RULES FOR MERGING:
1. For numeric fields (student counts, GPU counts): Use the HIGHEST non-zero value if models disagree
2. For dates/years: Use the most recent year
3. For sources: Combine all unique sources from all models
4. If a field is 0 or -1 in one model but has a positive value in another, use the positive value
5. For notes: Combine relevant notes from all models

## MODEL RESULTS:

"#
    );

    for result in results {
        let body = serde_json::to_string_pretty(&result.record)?;
        prompt.push_str(&format!(
            "### {} Result:\n```json\n{body}\n```\n\n",
            result.provider.as_str().to_uppercase()
        ));
    }

    prompt.push_str(
        r#"## OUTPUT:
Return ONLY a single merged JSON object with this structure:
{
  "university_name": "...",
  "data_retrieved_date": "...",
  "sources": [...combined from all models...],
  "student_data": {
    "undergrad_cs_count": <highest non-zero value>,
    "grad_cs_count": <highest non-zero value>,
    "phd_cs_count": <highest non-zero value>,
    "year": "<most recent year>",
    "source_url": "...",
    "notes": "<combined notes>"
  },
  "gpu_resources": {
    "h100_sxm_count": <highest value>,
    "h100_pcie_count": <highest value>,
    "h200_count": <highest value>,
    ...all other GPU fields with highest values...
    "notes": "<combined notes with calculations>"
  },
  "compute_credits": {...},
  "analysis_notes": "Ensemble result aggregated from OpenAI, Claude, and Gemini models."
}

Output ONLY the JSON, no other text."#,
    );
    Ok(prompt)
}

/// Post-validation prompt: the template followed by the record to audit.
pub fn validation_prompt(template: &str, record: &ResearchRecord) -> Result<String> {
    let body = serde_json::to_string_pretty(record)?;
    Ok(format!(
        r#"{template}

---

## DATA TO VALIDATE

Here is the JSON data for {entity}:

```json
{body}
```

Please validate this data and return the corrected JSON. Remember:
1. Remove any GPUs from shared/national resources
2. Keep all student data unchanged
3. Add a "validation_notes" field explaining changes
4. Return ONLY valid JSON, no other text
"#,
        entity = record.entity_name
    ))
}

/// Templates shared by every adapter for one run.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub research_template: String,
    pub validation_template: String,
}

impl Default for PromptContext {
    fn default() -> Self {
        Self {
            research_template: DEFAULT_RESEARCH_TEMPLATE.to_string(),
            validation_template: DEFAULT_VALIDATION_TEMPLATE.to_string(),
        }
    }
}

impl PromptContext {
    pub fn research_for(&self, entity: &str) -> String {
        render_research(&self.research_template, entity)
    }
}
