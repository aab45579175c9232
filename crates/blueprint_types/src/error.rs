// Load Errors - Graph document error taxonomy
//
// Each variant maps onto the numeric BP_ERR_* code carried by graph tooling.

pub const BP_ERR_NONE: i32 = 0;
pub const BP_ERR_GENERAL: i32 = -1;
pub const BP_ERR_NODE_LOAD: i32 = -2;
pub const BP_ERR_PIN_NUMPER: i32 = -3;
pub const BP_ERR_INPIN_LOAD: i32 = -4;
pub const BP_ERR_OUTPIN_LOAD: i32 = -5;
pub const BP_ERR_PIN_LINK: i32 = -6;
pub const BP_ERR_DOC_LOAD: i32 = -7;
pub const BP_ERR_GROUP_LOAD: i32 = -8;

/// Errors raised while loading a graph document or a node fragment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("{0}")]
    General(String),

    #[error("Node load failed: {0}")]
    NodeLoad(String),

    #[error("Pin count mismatch on {side} pins: saved {saved}, node has {expected}")]
    PinNumber {
        side: &'static str,
        saved: usize,
        expected: usize,
    },

    #[error("Input pin load failed: {0}")]
    InputPin(String),

    #[error("Output pin load failed: {0}")]
    OutputPin(String),

    #[error("Pin link failed: {0}")]
    PinLink(String),

    #[error("Document load failed: {0}")]
    Document(String),

    #[error("Group load failed: {0}")]
    GroupLoad(String),
}

impl LoadError {
    /// Numeric BP_ERR_* code
    pub fn code(&self) -> i32 {
        match self {
            LoadError::General(_) => BP_ERR_GENERAL,
            LoadError::NodeLoad(_) => BP_ERR_NODE_LOAD,
            LoadError::PinNumber { .. } => BP_ERR_PIN_NUMPER,
            LoadError::InputPin(_) => BP_ERR_INPIN_LOAD,
            LoadError::OutputPin(_) => BP_ERR_OUTPIN_LOAD,
            LoadError::PinLink(_) => BP_ERR_PIN_LINK,
            LoadError::Document(_) => BP_ERR_DOC_LOAD,
            LoadError::GroupLoad(_) => BP_ERR_GROUP_LOAD,
        }
    }
}

/// Code of a load outcome, `BP_ERR_NONE` on success
pub fn load_result_code<T>(result: &Result<T, LoadError>) -> i32 {
    match result {
        Ok(_) => BP_ERR_NONE,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LoadError::NodeLoad("x".into()).code(), -2);
        assert_eq!(
            LoadError::PinNumber {
                side: "input",
                saved: 1,
                expected: 2
            }
            .code(),
            BP_ERR_PIN_NUMPER
        );
        assert_eq!(LoadError::GroupLoad(String::new()).code(), -8);
        assert_eq!(load_result_code::<()>(&Ok(())), BP_ERR_NONE);
    }
}
