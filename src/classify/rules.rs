pub const UNCLASSIFIED_BUCKET: &str = "da_classificare";
pub const EVIDENCE_BUCKET: &str = "prove_allegati";

pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "mp3", "wav", "mp4", "avi",
];

pub struct RuleSpec {
    pub bucket_key: &'static str,
    pub display_name: &'static str,
    // (label, pattern) pairs; patterns run against normalized text.
    pub patterns: &'static [(&'static str, &'static str)],
    pub base_confidence: u32,
    pub tags: &'static [&'static str],
}

// Declaration order is the tie-break: procedure-specific rules come first.
pub const DEFAULT_RULES: &[RuleSpec] = &[
    RuleSpec {
        bucket_key: "denuncia_querela",
        display_name: "Denuncia–Querela / Notizia di reato",
        patterns: &[
            ("denuncia", r"\bdenuncia\b"),
            ("querela", r"\bquerela\b"),
            ("notizia di reato", r"notizia\s+di\s+reato"),
            ("esposto", r"\besposto\b"),
        ],
        base_confidence: 75,
        tags: &["denuncia", "querela", "notizia-reato"],
    },
    RuleSpec {
        bucket_key: "indagini_preliminari",
        display_name: "Indagini preliminari (PG/PM, 415-bis)",
        patterns: &[
            ("art. 415-bis", r"art\.?\s*415\s*-?\s*bis"),
            ("avviso ex 415-bis", r"avviso\s+ex\s+415\s*-?\s*bis"),
            ("procura della repubblica", r"procura\s+della\s+repubblica"),
            ("polizia giudiziaria", r"polizia\s+giudiziaria"),
            ("informativa di reato", r"informativa\s+di\s+reato"),
            ("sequestro probatorio", r"sequestro\s+probatorio"),
            ("perquisizione", r"\bperquisizione\b"),
            ("verbale di sequestro", r"verbale\s+di\s+sequestro"),
            ("invito a presentarsi", r"invito\s+a\s+presentarsi"),
        ],
        base_confidence: 80,
        tags: &["415-bis", "indagini", "sequestro", "perquisizione"],
    },
    RuleSpec {
        bucket_key: "perizie_consulenze",
        display_name: "Perizie & Consulenze (CTP/CTU)",
        patterns: &[
            ("consulenza tecnica di parte", r"consulenza\s+tecnica\s+di\s+parte"),
            ("consulente tecnico", r"consulente\s+tecnico"),
            ("CTP", r"\bctp\b"),
            ("CTU", r"\bctu\b"),
            ("perizia", r"\bperizia\b"),
            ("elaborato peritale", r"elaborato\s+peritale"),
        ],
        base_confidence: 70,
        tags: &["CTP", "CTU", "perizia", "consulenza"],
    },
    RuleSpec {
        bucket_key: EVIDENCE_BUCKET,
        display_name: "Prove & Allegati (foto, audio, chat)",
        patterns: &[
            ("allegati", r"\ballegati\b"),
            ("supporto digitale", r"supporto\s+digitale"),
            ("trascrizioni chat", r"trascrizioni\s+chat"),
            ("whatsapp", r"\bwhatsapp\b"),
            ("screenshot", r"\bscreenshot\b"),
            ("fotografia", r"\bfotografia\b"),
            ("file audio", r"file\s+audio"),
            ("registro chiamate", r"registro\s+chiamate"),
        ],
        base_confidence: 65,
        tags: &["allegati", "chat", "audio", "foto"],
    },
    RuleSpec {
        bucket_key: "udienze_verbali",
        display_name: "Udienze & Verbali",
        patterns: &[
            ("verbale di udienza", r"verbale\s+di\s+udienza"),
            ("udienza dibattimentale", r"udienza\s+dibattimentale"),
            ("lista testi", r"lista\s+testi"),
            ("esame imputato/teste", r"esame.*(?:imputato|teste)"),
            ("dibattimento", r"\bdibattimento\b"),
        ],
        base_confidence: 75,
        tags: &["udienza", "verbale", "dibattimento", "testi"],
    },
    RuleSpec {
        bucket_key: "provvedimenti_giudice",
        display_name: "Provvedimenti del giudice (GIP/GUP/Trib.)",
        patterns: &[
            ("ordinanza", r"\bordinanza\b"),
            ("decreto", r"\bdecreto\b"),
            ("sentenza", r"\bsentenza\b"),
            ("provvedimento", r"\bprovvedimento\b"),
            ("GIP", r"\bgip\b"),
            ("GUP", r"\bgup\b"),
            ("tribunale collegiale", r"tribunale\s+collegiale"),
            ("monocratico", r"\bmonocratico\b"),
        ],
        base_confidence: 80,
        tags: &["provvedimento", "GIP", "GUP", "sentenza", "ordinanza"],
    },
    RuleSpec {
        bucket_key: "admin_procure",
        display_name: "Admin & Procure",
        patterns: &[
            ("procura alle liti", r"procura\s+alle\s+liti"),
            ("delega difensiva", r"delega\s+difensiva"),
            ("nomina difensore", r"nomina\s+difensore"),
            ("informativa privacy", r"informativa\s+privacy"),
        ],
        base_confidence: 70,
        tags: &["procura", "delega", "privacy"],
    },
    RuleSpec {
        bucket_key: "corrispondenza_pec",
        display_name: "Corrispondenza & PEC",
        patterns: &[
            ("posta elettronica certificata", r"posta\s+elettronica\s+certificata"),
            ("PEC", r"\bpec\b"),
            ("ricevuta accettazione", r"ricevuta\s+accettazione"),
            ("ricevuta consegna", r"ricevuta.*consegna"),
            ("oggetto:", r"oggetto:"),
        ],
        base_confidence: 70,
        tags: &["PEC", "corrispondenza"],
    },
    RuleSpec {
        bucket_key: "parti_anagrafiche",
        display_name: "Parti & Anagrafiche",
        patterns: &[
            ("modulo anagrafico", r"modulo\s+anagrafico"),
            ("documento identità", r"documento\s+(?:di\s+|d'\s*)?identita"),
            ("foglio notizie", r"foglio\s+notizie"),
            ("dati anagrafici", r"dati\s+anagrafici"),
        ],
        base_confidence: 65,
        tags: &["anagrafica", "identità"],
    },
];

pub fn default_bucket_names() -> Vec<(&'static str, &'static str)> {
    std::iter::once((UNCLASSIFIED_BUCKET, "Da classificare"))
        .chain(
            DEFAULT_RULES
                .iter()
                .map(|rule| (rule.bucket_key, rule.display_name)),
        )
        .collect()
}
