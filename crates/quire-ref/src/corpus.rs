//! Sample product corpus for the reference retriever.
//!
//! All documents are hardcoded and fictional. They stand in for a real
//! document index so runs can complete offline.

/// One retrievable document.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusDocument {
    pub id: String,
    pub source: String,
    pub content: String,
}

impl CorpusDocument {
    pub fn new(id: &str, source: &str, content: &str) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            content: content.to_string(),
        }
    }
}

/// The built-in documents: pricing, features, support, security, and
/// a customer case study for the fictional "Lumen Analytics" product.
pub fn sample_documents() -> Vec<CorpusDocument> {
    vec![
        CorpusDocument::new(
            "pricing",
            "pricing.md",
            "Lumen Analytics pricing. Starter plan costs 50 per user per month with \
             up to 25 users. Business plan costs 90 per user per month and adds SSO \
             and audit exports. Enterprise pricing is negotiated annually with volume \
             discounts above 500 users.",
        ),
        CorpusDocument::new(
            "features",
            "features.md",
            "Lumen Analytics features: real-time dashboards, scheduled reports, \
             anomaly alerts, and a SQL workbench. Connectors cover Postgres, \
             Snowflake, BigQuery, and CSV uploads. Dashboards can be embedded in \
             customer portals.",
        ),
        CorpusDocument::new(
            "support",
            "support.md",
            "Support and onboarding: every plan includes email support with a one \
             business day response. Business and Enterprise customers get a named \
             onboarding manager and a 99.9% uptime service level. Enterprise adds \
             24/7 phone support.",
        ),
        CorpusDocument::new(
            "security",
            "security.md",
            "Security and compliance: data is encrypted at rest and in transit. \
             Lumen Analytics holds SOC 2 Type II certification, supports SAML SSO, \
             and offers regional data residency in the EU and US.",
        ),
        CorpusDocument::new(
            "case-retail",
            "case_study_retail.md",
            "Case study: a mid-size retail chain replaced weekly spreadsheet reports \
             with Lumen Analytics dashboards, cutting reporting time by 70% and \
             catching stock-outs two days earlier through anomaly alerts.",
        ),
    ]
}
