/// Upstream defaults (OpenAI-compatible endpoints)
pub const DEFAULT_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_IMAGE_URL: &str = "https://api.openai.com/v1/images/generations";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REASONING_MODEL: &str = "o3-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_TITLE_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

/// Environment variables
pub const ENV_CHAT_API_KEY: &str = "CHAT_API_KEY";
pub const ENV_REASONING_API_KEY: &str = "REASONING_API_KEY";
pub const ENV_IMAGE_API_KEY: &str = "IMAGE_API_KEY";
pub const ENV_CREATOR_PASSPHRASE: &str = "CREATOR_PASSPHRASE";
pub const ENV_STATIC_CREDENTIALS: &str = "GATEWAY_STATIC_CREDENTIALS";

/// Headers
pub const REQUEST_ID_HEADER: &str = "x-gateway-request-id";
pub const DEADLINE_HEADER: &str = "x-gateway-deadline-ms";

/// SSE terminator payload
pub const DONE_MARKER: &str = "[DONE]";

/// Database defaults
pub const DB_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA busy_timeout = 5000",
];

/// Side channel
pub const TITLE_TRANSCRIPT_TURNS: usize = 4;
pub const TITLE_TRANSCRIPT_CHARS_PER_TURN: usize = 300;
pub const MEMORY_VALUE_MAX_CHARS: usize = 80;

/// Canned replies
pub const RESTRICTED_REFUSAL: &str = "I can't help with that topic without a verified clearance. \
If you hold one, upload your clearance certificate from your profile page and try again.";
pub const RESTRICTED_MODE_INSTRUCTIONS: &str = "Restricted mode requires a verified clearance certificate. \
To activate it: 1) open your profile, 2) upload the certificate issued by your organization, \
3) wait for verification to complete. Once verified, restricted topics become available for the certificate's validity period.";
pub const RESTRICTED_MODE_ALREADY_ACTIVE: &str =
    "Restricted mode is already active for this session.";

/// Intent keyword defaults (lowercase). Workflow groups are listed in
/// priority order and must stay disjoint.
pub const COMPONENT_SELECTION_KEYWORDS: &[&str] = &[
    "which component",
    "choose a",
    "select a",
    "part number",
    "recommend a",
    "alternative to",
    "bom",
    "bill of materials",
    "datasheet for",
];
pub const CIRCUIT_DESIGN_KEYWORDS: &[&str] = &["schematic", "circuit", "wiring", "breadboard"];
pub const PCB_LAYOUT_KEYWORDS: &[&str] = &["pcb", "layout", "footprint", "gerber", "trace width"];
pub const THREE_D_MODELING_KEYWORDS: &[&str] =
    &["3d model", "enclosure", "cad", "stl", "3d print"];
pub const SIMULATION_KEYWORDS: &[&str] = &[
    "simulate",
    "simulation",
    "spice",
    "waveform",
    "transient analysis",
];
pub const LEARNING_KEYWORDS: &[&str] = &["teach me", "explain", "what is", "how does", "tutorial", "learn"];

pub const IMAGE_KEYWORDS: &[&str] = &[
    "generate image",
    "generate an image",
    "create an image",
    "create image",
    "draw",
    "picture of",
    "image of",
    "illustration of",
    "render an image",
];
pub const DEEP_REASONING_KEYWORDS: &[&str] = &[
    "step by step",
    "prove",
    "derive",
    "in depth",
    "detailed analysis",
    "calculate",
    "optimize",
    "trade-off",
    "tradeoff",
    "explain in detail",
];
pub const RESEARCH_KEYWORDS: &[&str] = &[
    "research",
    "datasheet",
    "compare",
    "sources",
    "citations",
    "literature",
    "state of the art",
];

pub const RESTRICTED_TOPIC_KEYWORDS: &[&str] = &[
    "military",
    "weapon",
    "missile",
    "warhead",
    "explosive",
    "detonator",
    "radar jamming",
    "guidance system",
    "classified",
];
pub const RESTRICTED_MODE_PHRASES: &[&str] = &[
    "activate restricted mode",
    "activate defense mode",
    "enable restricted mode",
];

/// Redirect routes the chat model may suggest: (route, module, label)
pub const REDIRECT_MODULES: &[(&str, &str, &str)] = &[
    ("component_selection", "component-selector", "Open Component Selector"),
    ("circuit_design", "circuit-designer", "Open Circuit Designer"),
    ("three_d_modeling", "3d-modeler", "Open 3D Modeler"),
    ("simulation", "simulator", "Open Simulator"),
    ("learning", "learning-hub", "Open Learning Hub"),
];

/// System instructions
pub const BASE_SYSTEM_PROMPT: &str = "You are an electronics engineering assistant. \
Answer precisely, state assumptions, and prefer standard part values.";
pub const RESEARCH_MODE_PROMPT: &str = "Research mode: cite datasheets or standards where possible, \
compare alternatives explicitly, and flag uncertainty.";
pub const CASUAL_MODE_PROMPT: &str = "Keep answers conversational and concise.";
pub const REDIRECT_INSTRUCTIONS: &str = "If the user would be better served by one of the dedicated tools \
(component_selection, circuit_design, three_d_modeling, simulation, learning), end your answer with a single JSON object \
on its own line: {\"route\": \"<tool>\", \"reason\": \"<short reason>\", \"prompt\": \"<prompt to prefill in the tool>\"}. \
Otherwise do not emit JSON.";
pub const TITLE_SYSTEM_PROMPT: &str = "Generate a concise 2-5 word title for the following conversation. \
Reply with the title only, no punctuation or quotes.";
