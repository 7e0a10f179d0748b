//! Social competence evaluation for chat models.
//!
//! Two evaluations share one engine:
//!
//! - **Goal achievement** walks branching stories ([`story`]), letting the
//!   model pick the protagonist's replies, and scores how often the story
//!   ends with the goal fully achieved.
//! - **Interpersonal abilities** asks multiple-choice skill questions
//!   ([`quiz`]) and scores accuracy per skill and skill family.
//!
//! Model access goes through the [`llm::DecisionMaker`] trait; model output is
//! only ever read through the strict parser in [`llm::response`].

pub mod choices;
pub mod error;
pub mod eval;
pub mod llm;
pub mod prompt;
pub mod quiz;
pub mod stats;
pub mod story;
pub mod taxonomy;
