pub mod coordinator;
pub mod generation;
pub mod measurement;
pub mod runtime;
pub mod stage_result;
pub mod tool_adapters;
pub mod workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Materialize,
    SearchGeneration,
    AiGeneration,
    Coverage,
    Mutation,
    Report,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Materialize => "materialize",
            Self::SearchGeneration => "search_generation",
            Self::AiGeneration => "ai_generation",
            Self::Coverage => "coverage",
            Self::Mutation => "mutation",
            Self::Report => "report",
        }
    }
}
