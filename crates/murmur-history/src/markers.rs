//! Text markers shared between prompt assembly and persistence cleaning.
//! Anything emitted here must be stripped again before text reaches either
//! history store, so prompts never compost into later prompts.

/// Header above the formatted history block.
pub const HISTORY_HEADER: &str = "=== Conversation history ===";
/// Header above the current inbound message.
pub const CURRENT_MESSAGE_HEADER: &str =
    "=== [IMPORTANT] CURRENT NEW MESSAGE (prioritize its content) ===";
/// Prefix on the bot's own historical replies.
pub const OWN_REPLY_WARNING: &str = "⚠️ [DO NOT REPEAT — this is your own previous reply]";
/// Bar line surrounding the current-message block.
pub const DELIMITER_BAR: &str =
    "==================================================";
/// Header above injected long-term memories.
pub const BACKGROUND_HEADER: &str = "=== BACKGROUND INFO ===";
/// Footer closing the injected memory section.
pub const BACKGROUND_FOOTER: &str = "=== END BACKGROUND INFO ===";
/// Header above the tools reminder.
pub const TOOLS_HEADER: &str = "=== AVAILABLE TOOLS ===";
/// Footer closing the tools reminder.
pub const TOOLS_FOOTER: &str = "=== END AVAILABLE TOOLS ===";
/// Prefix marking a synthetic proactive-chat user entry. Survives cleaning
/// so the host can tell these from organic user messages.
pub const PROACTIVE_MARKER: &str = "[proactive]";
/// Literal a poke notification renders to in message text.
pub const POKE_TEXT_MARKER: &str = "[poke]";
