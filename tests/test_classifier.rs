//! Integration tests for the message classifier

use kodegen_claude_companion::message::{Classifier, ClassifyAction, ClassifyMode, MessageBuffer};
use serde_json::{Value, json};

fn conversation() -> Vec<Value> {
    vec![
        json!({"type":"system","subtype":"init","session_id":"agent-7","model":"sonnet","tools":["Read","Write"]}),
        json!({"type":"assistant","message":{"content":[{"type":"text","text":"Looking at the repo."}]}}),
        json!({"type":"assistant","message":{"content":[
            {"type":"tool_use","id":"t1","name":"Write","input":{"file_path":"/tmp/out.txt","content":"x"}}
        ]}}),
        json!({"type":"user","message":{"role":"user","content":[
            {"type":"tool_result","tool_use_id":"t1","content":"ok"}
        ]}}),
        json!({"type":"assistant","message":{"content":[{"type":"text","text":"Wrote the file."}]}}),
        json!({"type":"result","subtype":"success","result":"Wrote the file.","is_error":false,
               "duration_ms":1200,"num_turns":3,"session_id":"agent-7"}),
    ]
}

fn run(mode: ClassifyMode) -> (Vec<ClassifyAction>, MessageBuffer) {
    let classifier = Classifier::default();
    let mut buffer = MessageBuffer::new();
    let actions = conversation()
        .iter()
        .map(|value| classifier.classify(value, &mut buffer, mode).action)
        .collect();
    (actions, buffer)
}

#[test]
fn test_same_input_same_output() {
    let (first, first_buffer) = run(ClassifyMode::Streaming);
    let (second, second_buffer) = run(ClassifyMode::Streaming);
    assert_eq!(first, second);
    assert_eq!(first_buffer, second_buffer);
}

#[test]
fn test_conversation_action_sequence() {
    let (actions, buffer) = run(ClassifyMode::Streaming);
    assert!(matches!(actions[0], ClassifyAction::Buffer));
    assert!(matches!(actions[1], ClassifyAction::Buffer));
    match &actions[2] {
        ClassifyAction::ToolUse(tools) => {
            assert_eq!(tools.len(), 1);
            assert_eq!(tools[0].name, "Write");
        }
        other => panic!("expected tool use, got {other:?}"),
    }
    assert!(matches!(actions[3], ClassifyAction::Buffer));

    let ClassifyAction::FinalResult(result) = &actions[5] else {
        panic!("expected final result, got {:?}", actions[5]);
    };
    assert!(result.success);
    assert_eq!(result.num_turns, 3);
    assert_eq!(result.agent_session_id.as_deref(), Some("agent-7"));
    assert_eq!(result.deliverables, vec!["/tmp/out.txt".to_string()]);

    // Request-scoped state is gone, the conversation id is kept
    assert!(buffer.is_empty());
    assert!(buffer.deliverables().is_empty());
    assert_eq!(buffer.agent_session_id(), Some("agent-7"));
}

#[test]
fn test_aggregate_mode_returns_joined_text() {
    let (actions, _) = run(ClassifyMode::Aggregate);
    let Some(ClassifyAction::FinalResult(result)) = actions.last() else {
        panic!("expected final result");
    };
    assert_eq!(result.text, "Looking at the repo.\n\nWrote the file.");
}

#[test]
fn test_unknown_types_are_skipped_without_touching_buffer() {
    let classifier = Classifier::default();
    let mut buffer = MessageBuffer::new();
    let classified = classifier.classify(
        &json!({"type":"stream_event","event":{}}),
        &mut buffer,
        ClassifyMode::Streaming,
    );
    assert_eq!(classified.action, ClassifyAction::Skip);
    assert!(classified.message.is_none());
    assert_eq!(buffer, MessageBuffer::new());
}
