//! Wire payload construction for flow-execution calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, FlowgateError};
use crate::model::ChatMessage;

/// Body of a `POST /api/v1/run/{flow}` call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FlowRequest {
    pub input_type: String,
    pub output_type: String,
    pub input_value: String,
    pub tweaks: HashMap<String, HistoryTweak>,
}

/// Per-node override injected via `tweaks`; flowgate only ever overrides the
/// history component's `messages` input.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryTweak {
    pub messages: HistoryMessages,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryMessages {
    pub content: Vec<ChatMessage>,
}

/// Build the upstream payload from the ordered message list.
///
/// The last message's content becomes `input_value`. When a history component
/// id is known, every prior message is handed to that node through `tweaks`
/// (order preserved) so the flow replays the conversation; without one,
/// `tweaks` stays empty and the flow sees only the latest turn.
pub fn build_request(
    messages: &[ChatMessage],
    history_component: Option<&str>,
) -> CoreResult<FlowRequest> {
    let Some((last, prior)) = messages.split_last() else {
        return Err(FlowgateError::InvalidInput(
            "messages must not be empty".into(),
        ));
    };

    let mut tweaks = HashMap::new();
    if let Some(id) = history_component {
        tweaks.insert(
            id.to_string(),
            HistoryTweak {
                messages: HistoryMessages {
                    content: prior.to_vec(),
                },
            },
        );
    }

    Ok(FlowRequest {
        input_type: "chat".into(),
        output_type: "chat".into(),
        input_value: last.content.clone(),
        tweaks,
    })
}
