use crate::data::{InternshipIndex, LocationIndex, PeriodIndex, StudentIndex};
use crate::extract::{DenseAssignment, Slot};
use crate::normalize::Problem;
use good_lp::{Constraint, Expression, ProblemVariables, Variable, constraint, variable};
use log::{info, trace};

/// Tunes the objective; the constraint set is the same either way.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveOptions {
    /// Adds the preference penalty when the problem carries preference lists.
    pub preference_penalty: bool,
    /// Weight of the stability term. `None` weights it by the location count
    /// when the preference term is present, and by 1 otherwise.
    pub stability_scale: Option<f64>,
}

impl Default for ObjectiveOptions {
    fn default() -> Self {
        Self {
            preference_penalty: true,
            stability_scale: None,
        }
    }
}

/// Composite key of one decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarKey {
    pub student: StudentIndex,
    pub period: PeriodIndex,
    pub internship: InternshipIndex,
    /// position of the location inside the internship
    pub slot: usize,
}

/// Dense table of the boolean decision variables.
///
/// x[s, w, i, j] = 1 if student s sits at location j of internship i in period w
///                 0 otherwise
#[derive(Debug, Clone)]
pub struct VariableSpace {
    students: usize,
    periods: usize,
    /// offsets[i] is the first slot of internship i inside one period block
    offsets: Vec<usize>,
    /// (internship, global location) of every slot in a period block
    slots: Vec<Slot>,
    vars: Vec<Variable>,
}

impl VariableSpace {
    pub fn new(problem: &Problem, problem_vars: &mut ProblemVariables) -> Self {
        let mut offsets = Vec::with_capacity(problem.internships.len());
        let mut slots = Vec::new();
        for (internship, locations) in problem.internships.iter().enumerate() {
            offsets.push(slots.len());
            slots.extend(locations.iter().map(|&location| Slot {
                internship,
                location,
            }));
        }

        let students = problem.students.len();
        let periods = problem.periods.len();
        let vars = problem_vars.add_vector(variable().binary(), students * periods * slots.len());
        Self {
            students,
            periods,
            offsets,
            slots,
            vars,
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Number of (internship, location) choices per student and period.
    pub fn slots_per_period(&self) -> usize {
        self.slots.len()
    }

    fn block(&self, student: StudentIndex, period: PeriodIndex) -> usize {
        assert!(
            student < self.students && period < self.periods,
            "decision variable (student {student}, period {period}) out of range"
        );
        (student * self.periods + period) * self.slots.len()
    }

    /// Variable of `key`. Panics when the key lies outside the space.
    pub fn var(&self, key: VarKey) -> Variable {
        let width = self
            .offsets
            .get(key.internship + 1)
            .copied()
            .unwrap_or(self.slots.len())
            - self.offsets[key.internship];
        assert!(key.slot < width, "slot {} outside internship {}", key.slot, key.internship);
        self.vars[self.block(key.student, key.period) + self.offsets[key.internship] + key.slot]
    }

    /// All choices of one student in one period, with their (internship, location).
    pub fn choices(&self, student: StudentIndex, period: PeriodIndex) -> impl Iterator<Item = (Slot, Variable)> + '_ {
        let start = self.block(student, period);
        self.slots
            .iter()
            .copied()
            .zip(self.vars[start..start + self.slots.len()].iter().copied())
    }

    /// Reads the unique chosen slot of every (student, period) from `value`.
    ///
    /// Returns `None` when some period has no chosen slot or more than one,
    /// which is what an engine hands back when it stops without an incumbent.
    pub fn decode(&self, value: impl Fn(Variable) -> f64) -> Option<DenseAssignment> {
        let mut rows = Vec::with_capacity(self.students);
        for student in 0..self.students {
            let mut row = Vec::with_capacity(self.periods);
            for period in 0..self.periods {
                let mut chosen = self.choices(student, period).filter(|(_, var)| value(*var) > 0.5);
                let (slot, _) = chosen.next()?;
                if chosen.next().is_some() {
                    return None;
                }
                row.push(slot);
            }
            rows.push(row);
        }
        Some(DenseAssignment { rows })
    }
}

/// Everything the solving engine needs for one job.
pub struct AllocationModel {
    pub variables: ProblemVariables,
    pub space: VariableSpace,
    pub constraints: Vec<Constraint>,
    pub objective: Expression,
}

/// Builds variables, hard constraints and the objective for a normalized problem.
pub fn build_model(problem: &Problem, options: &ObjectiveOptions) -> AllocationModel {
    info!(
        "Setting up allocation model with {} students, {} periods and {} internships...",
        problem.students.len(),
        problem.periods.len(),
        problem.internships.len()
    );
    let mut variables = ProblemVariables::new();
    let space = VariableSpace::new(problem, &mut variables);
    trace!(
        "Generated {} decision variables ({} choices per student and period).",
        space.len(),
        space.slots_per_period()
    );

    let mut constraints = Vec::new();
    info!("Adding 'one placement per period' constraints...");
    constraints.extend(one_placement_per_period(problem, &space));
    info!("Adding 'internship quota' constraints...");
    constraints.extend(internship_quotas(problem, &space));
    info!("Adding 'location capacity' constraints...");
    constraints.extend(location_capacities(problem, &space));

    let objective = build_objective(problem, &space, options, &mut variables, &mut constraints);

    AllocationModel {
        variables,
        space,
        constraints,
        objective,
    }
}

fn one_placement_per_period(problem: &Problem, space: &VariableSpace) -> Vec<Constraint> {
    let mut constraints = Vec::with_capacity(problem.students.len() * problem.periods.len());
    for student in 0..problem.students.len() {
        for period in 0..problem.periods.len() {
            let placed: Expression = space.choices(student, period).map(|(_, var)| var).sum();
            constraints.push(constraint!(placed == 1));
        }
    }
    constraints
}

fn internship_quotas(problem: &Problem, space: &VariableSpace) -> Vec<Constraint> {
    let mut constraints = Vec::new();
    for student in 0..problem.students.len() {
        for (internship, &weeks) in problem.allocation_rule.iter().enumerate() {
            let spent: Expression = (0..problem.periods.len())
                .flat_map(|period| space.choices(student, period))
                .filter(|(slot, _)| slot.internship == internship)
                .map(|(_, var)| var)
                .sum();
            let weeks = weeks as f64;
            constraints.push(constraint!(spent == weeks));
        }
    }
    constraints
}

fn location_capacities(problem: &Problem, space: &VariableSpace) -> Vec<Constraint> {
    // a location shared by several internships is capped once per period
    let mut constraints = Vec::new();
    for period in 0..problem.periods.len() {
        for location in 0..problem.location_names.len() {
            let occupants: Vec<Variable> = (0..problem.students.len())
                .flat_map(|student| space.choices(student, period))
                .filter(|(slot, _)| slot.location == location)
                .map(|(_, var)| var)
                .collect();
            if occupants.is_empty() {
                continue;
            }
            let occupied: Expression = occupants.into_iter().sum();
            let capacity = problem.capacity(location, period) as f64;
            constraints.push(constraint!(occupied <= capacity));
        }
    }
    constraints
}

/// Position of `location` in `ranked`, or the list length when it is absent.
///
/// Entries naming locations of other internships still occupy their position.
pub fn preference_rank(ranked: &[LocationIndex], location: LocationIndex) -> usize {
    ranked
        .iter()
        .position(|&l| l == location)
        .unwrap_or(ranked.len())
}

fn build_objective(
    problem: &Problem,
    space: &VariableSpace,
    options: &ObjectiveOptions,
    variables: &mut ProblemVariables,
    constraints: &mut Vec<Constraint>,
) -> Expression {
    let preferences = problem
        .preferences
        .as_ref()
        .filter(|_| options.preference_penalty);

    // stability: |x[s,w,i,j] - x[s,w+1,i,j]| summed over adjacent periods
    let mut switches = Vec::new();
    for student in 0..problem.students.len() {
        for period in 1..problem.periods.len() {
            let earlier = space.choices(student, period - 1);
            let later = space.choices(student, period);
            for ((_, before), (_, after)) in earlier.zip(later) {
                let delta = variables.add(variable().integer().min(-1).max(1));
                let loss = variables.add(variable().min(0).max(1));
                constraints.push(constraint!(delta == before - after));
                constraints.push(constraint!(loss >= delta));
                constraints.push(constraint!(loss + delta >= 0));
                switches.push(loss);
            }
        }
    }
    let stability: Expression = switches.iter().copied().sum();

    let scale = options.stability_scale.unwrap_or(if preferences.is_some() {
        problem.location_names.len().max(1) as f64
    } else {
        1.0
    });
    let mut objective = scale * stability;
    info!(
        "Objective: stability penalty over {} switch terms (scale {})",
        switches.len(),
        scale
    );

    if let Some(preferences) = preferences {
        // rank[s,w,i,j] = rank of location j for student s whenever x[s,w,i,j] = 1
        let mut ranks = Vec::new();
        let declared = problem.declared_internships();
        for (student, per_internship) in preferences.iter().enumerate() {
            for period in 0..problem.periods.len() {
                for (slot, x) in space.choices(student, period) {
                    if slot.internship >= declared {
                        continue;
                    }
                    let ranked = &per_internship[slot.internship];
                    let worst = ranked.len() as f64;
                    let rank = preference_rank(ranked, slot.location) as f64;
                    let aux = variables.add(variable().integer().min(0).max(worst));
                    constraints.push(constraint!(aux >= rank * x));
                    constraints.push(constraint!(aux + worst * x <= rank + worst));
                    ranks.push(aux);
                }
            }
        }
        info!("Objective: preference penalty over {} rank terms", ranks.len());
        let preference: Expression = ranks.into_iter().sum();
        objective += preference;
    }

    objective
}
