use serde::{Deserialize, Serialize};

/// Session status. A closed set: the lifecycle service rejects anything the
/// client sends outside of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Estado {
    #[serde(rename = "EN_CURSO")]
    EnCurso,
    #[serde(rename = "BLOQUEADO")]
    Bloqueado,
    #[serde(rename = "DETENIDO")]
    Detenido,
    #[serde(rename = "FINALIZADO")]
    Finalizado,
}

impl Estado {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnCurso => "EN_CURSO",
            Self::Bloqueado => "BLOQUEADO",
            Self::Detenido => "DETENIDO",
            Self::Finalizado => "FINALIZADO",
        }
    }
}

impl Default for Estado {
    fn default() -> Self {
        Self::EnCurso
    }
}

impl std::fmt::Display for Estado {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Estado {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EN_CURSO" => Ok(Self::EnCurso),
            "BLOQUEADO" => Ok(Self::Bloqueado),
            "DETENIDO" => Ok(Self::Detenido),
            "FINALIZADO" => Ok(Self::Finalizado),
            other => Err(format!("unknown estado: {other}")),
        }
    }
}
