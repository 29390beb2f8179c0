//! Conversation partners and the live system instruction built from them.

use std::fmt;

/// Prebuilt synthesized voices offered by the conversation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarVoice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Zephyr,
}

impl AvatarVoice {
    /// Identifier expected by the conversation service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Zephyr => "Zephyr",
        }
    }
}

impl fmt::Display for AvatarVoice {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accent {
    American,
    British,
}

impl fmt::Display for Accent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::American => "American",
            Self::British => "British",
        })
    }
}

/// Static configuration of a conversation partner. Immutable for the whole
/// session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarPersona {
    pub name: String,
    pub accent: Accent,
    pub voice: AvatarVoice,
    /// Behavior script appended to the fixed conversation rules.
    pub script: String,
    /// Short presentation text shown to the user (pt-BR).
    pub description: String,
    /// Whether status messages about this persona use feminine agreement.
    pub feminine: bool,
}

const CONVERSATION_RULES: &str = "YOU ARE A NATIVE SPEAKER CONVERSATION PARTNER.
- MANDATORY RULE: NEVER repeat, parrot, or rephrase the user's sentence back to them if they are correct.
- NO CONFIRMATION: Do not say \"You said correctly: ...\" or similar.
- FLOW: If the user is correct, respond IMMEDIATELY to their question or comment like a real human friend.
- CORRECTION: ONLY use the word \"Correction:\" if there is a real grammatical error. If you correct, be brief: \"Correction: [Right sentence]. Anyway, [Your response]\".
- PORTUGUESE: You understand Portuguese perfectly. If the user is stuck, help them in English.";

impl AvatarPersona {
    /// Builds the system instruction of a live conversation with this
    /// persona, optionally personalized with the user's name and primed with
    /// the tail of their previous conversation.
    pub fn system_instruction(
        &self,
        display_name: Option<&str>,
        previous_context: Option<&str>,
    ) -> String {
        let mut instruction = format!(
            "{CONVERSATION_RULES}\n- ROLEPLAY: Act according to your specific persona: {}",
            self.script
        );

        if let Some(name) = display_name.map(str::trim).filter(|name| !name.is_empty()) {
            instruction.push_str(&format!(
                "\n- USER: The user's name is {name}. Use it naturally, not in every sentence."
            ));
        }

        if let Some(context) = previous_context
            .map(str::trim)
            .filter(|context| !context.is_empty())
        {
            instruction.push_str(
                "\n- CONTINUITY: This is how your last conversation with this user ended. \
                 Pick up naturally from it if it fits:\n",
            );
            instruction.push_str(context);
        }

        instruction
    }
}

/// Returns the built-in catalog of conversation partners.
pub fn builtin_personas() -> Vec<AvatarPersona> {
    vec![
        AvatarPersona {
            name: "Léo".to_string(),
            accent: Accent::American,
            voice: AvatarVoice::Puck,
            script: "PERSONALITY: Friendly American athlete.\n\
                     STYLE: Casual and direct.\n\
                     RULE: NEVER repeat the user's sentence. If they speak well, just keep the chat going. \
                     Use \"Correction:\" only if they fail grammar completely."
                .to_string(),
            description: "Um cara legal que adora esportes. Ele conversa naturalmente e te ajuda a \
                          corrigir erros de forma direta e sem enrolação."
                .to_string(),
            feminine: false,
        },
        AvatarPersona {
            name: "Sophia".to_string(),
            accent: Accent::American,
            voice: AvatarVoice::Zephyr,
            script: "PERSONALITY: Sophisticated professional mentor.\n\
                     STYLE: Warm, clear, and high-level.\n\
                     RULE: Do not parrot the user. Respond to the ideas, not the grammar, unless there \
                     is an error to fix using \"Correction:\"."
                .to_string(),
            description: "Profissional e acolhedora. Ela foca no diálogo sobre carreira e é rigorosa \
                          em manter a conversa fluindo com qualidade."
                .to_string(),
            feminine: true,
        },
        AvatarPersona {
            name: "James".to_string(),
            accent: Accent::British,
            voice: AvatarVoice::Fenrir,
            script: "PERSONALITY: Intelligent British gentleman.\n\
                     STYLE: Witty and polite.\n\
                     RULE: Strictly ignore correct sentences and move forward. Only use \"Correction:\" \
                     for significant blunders."
                .to_string(),
            description: "Sotaque britânico polido. Ele engaja em conversas inteligentes e corrige \
                          rigorosamente seus erros para você soar impecável."
                .to_string(),
            feminine: false,
        },
        AvatarPersona {
            name: "Maya".to_string(),
            accent: Accent::American,
            voice: AvatarVoice::Kore,
            script: "PERSONALITY: Energetic, trendy Gen-Z friend.\n\
                     STYLE: Fast, lots of slang, very social.\n\
                     RULE: NO REPEATING. Just chat like we are on a call. Use \"Correction:\" if I say \
                     something really weird."
                .to_string(),
            description: "Energia pura! Ela fala como uma jovem nativa, usa gírias e não deixa passar \
                          nenhum erro de gramática enquanto fofoca."
                .to_string(),
            feminine: true,
        },
    ]
}

/// Looks a built-in persona up by name, ignoring case.
pub fn persona_by_name(name: &str) -> Option<AvatarPersona> {
    let name = name.trim();
    builtin_personas()
        .into_iter()
        .find(|persona| persona.name.to_lowercase() == name.to_lowercase())
}
