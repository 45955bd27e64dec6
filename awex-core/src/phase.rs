/// Defines experiment phases and behavior
pub trait Phase: Copy + Clone + PartialEq + Send + Sync + std::fmt::Debug + Default {
    fn allows_input(&self) -> bool;
    fn next(&self) -> Option<Self>;

    fn is_practice(&self) -> bool {
        false
    }

    fn is_detection_practice(&self) -> bool {
        false
    }

    /// Phase during which an adaptive controller estimates the threshold.
    fn is_calibration(&self) -> bool {
        false
    }

    fn is_experiment(&self) -> bool {
        false
    }

    fn is_welcome(&self) -> bool {
        false
    }

    fn label(&self) -> &'static str;
}

#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum StandardPhase {
    #[default]
    Welcome,
    Practice,
    DetectionPractice,
    Calibration,
    Experiment,
    Debrief,
}

impl Phase for StandardPhase {
    fn allows_input(&self) -> bool {
        !matches!(self, Self::Debrief)
    }

    fn next(&self) -> Option<Self> {
        use StandardPhase::*;
        Some(match self {
            Welcome => Practice,
            Practice => DetectionPractice,
            DetectionPractice => Calibration,
            Calibration => Experiment,
            Experiment => Debrief,
            Debrief => return None,
        })
    }

    fn is_practice(&self) -> bool {
        matches!(self, StandardPhase::Practice)
    }

    fn is_detection_practice(&self) -> bool {
        matches!(self, StandardPhase::DetectionPractice)
    }

    fn is_calibration(&self) -> bool {
        matches!(self, StandardPhase::Calibration)
    }

    fn is_experiment(&self) -> bool {
        matches!(self, StandardPhase::Experiment)
    }

    fn is_welcome(&self) -> bool {
        matches!(self, StandardPhase::Welcome)
    }

    fn label(&self) -> &'static str {
        match self {
            StandardPhase::Welcome => "welcome",
            StandardPhase::Practice => "practice",
            StandardPhase::DetectionPractice => "detection_practice",
            StandardPhase::Calibration => "calibration",
            StandardPhase::Experiment => "experiment",
            StandardPhase::Debrief => "debrief",
        }
    }
}
