use crate::gateway::ProcedureSummary;

/// Keep the instruction compact: titles only, each clipped, count capped.
/// Full step bodies never leave the catalog.
const MAX_STEPS: usize = 40;
const MAX_TITLE_CHARS: usize = 80;

/// Build the system instruction from the active procedure and area.
pub fn build_system_prompt(procedure: Option<&ProcedureSummary>, area_id: &str) -> String {
    let mut prompt = format!(
        "Eres un asistente para operarios que ejecutan procedimientos \
         operativos del área \"{area_id}\". Responde en español, de forma \
         breve y práctica. Si la pregunta no se relaciona con el \
         procedimiento, indícalo con cortesía."
    );

    if let Some(p) = procedure {
        prompt.push_str(&format!(
            "\n\nProcedimiento activo: {} – {}.\nPasos del procedimiento:\n",
            p.pro_id, p.nombre
        ));
        for titulo in p.pasos.iter().take(MAX_STEPS) {
            prompt.push_str("- ");
            prompt.push_str(&clip(titulo, MAX_TITLE_CHARS));
            prompt.push('\n');
        }
        if p.pasos.len() > MAX_STEPS {
            prompt.push_str(&format!("(y {} pasos más)\n", p.pasos.len() - MAX_STEPS));
        }
    }

    prompt
}

fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut clipped: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pasos: Vec<String>) -> ProcedureSummary {
        ProcedureSummary {
            pro_id: "PRO141".to_string(),
            nombre: "Tratamiento de materiales obsoletos".to_string(),
            pasos,
        }
    }

    #[test]
    fn prompt_without_procedure_mentions_area() {
        let prompt = build_system_prompt(None, "mantenimiento");
        assert!(prompt.contains("mantenimiento"));
        assert!(!prompt.contains("Procedimiento activo"));
    }

    #[test]
    fn prompt_includes_procedure_and_steps() {
        let prompt = build_system_prompt(
            Some(&summary(vec![
                "Definir alcance".to_string(),
                "Identificar materiales".to_string(),
            ])),
            "inventario",
        );
        assert!(prompt.contains("PRO141 – Tratamiento de materiales obsoletos"));
        assert!(prompt.contains("- Definir alcance"));
        assert!(prompt.contains("- Identificar materiales"));
    }

    #[test]
    fn long_titles_are_clipped() {
        let long = "x".repeat(200);
        let prompt = build_system_prompt(Some(&summary(vec![long])), "inventario");
        assert!(prompt.contains('…'));
        assert!(!prompt.contains(&"x".repeat(100)));
    }

    #[test]
    fn step_count_is_capped() {
        let pasos: Vec<String> = (0..60).map(|i| format!("Paso {i}")).collect();
        let prompt = build_system_prompt(Some(&summary(pasos)), "inventario");
        assert!(prompt.contains("Paso 39"));
        assert!(!prompt.contains("Paso 40\n"));
        assert!(prompt.contains("(y 20 pasos más)"));
    }

    #[test]
    fn clip_is_char_boundary_safe() {
        let s = "ñáé".repeat(50);
        let clipped = clip(&s, 10);
        assert_eq!(clipped.chars().count(), 10);
    }
}
