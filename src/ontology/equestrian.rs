//! Built-in descriptor for the equestrian research knowledge graph.
//!
//! Placeholders `{ns}` and `{p}` are substituted with the configured namespace
//! and prefix.

use super::{Exemplar, OntologyDescriptor, Prefix};

const SUMMARY: &str = r#"# EQUESTRIAN ONTOLOGY - FULL STRUCTURE

## NAMESPACE
{ns}

## MAIN CLASSES

### 1. Horse
A horse.
Properties:
  - hasName (string): name of the horse (e.g. "Dakota")
  - hasPuce (integer): microchip number
  - hasRace (string): breed
  - hasRobe (string): coat colour
  - hasHeight (float): height
Example: Horse1 with hasName "Dakota"

### 2. Rider
A rider.
Properties:
  - hasName (string): name of the rider

### 3. Training
Training sessions.
Subclasses:
  - PreparationStage: preparation before competition
  - PreCompetitionStage: pre-competitive training
  - CompetitionStage: competition phase
  - TransitionStage: transition / recovery phase
Properties:
  - Frequency (integer): sessions per week (e.g. 4)
  - Intensity (string): Moderate, High, Peak or Low
  - Volume (string): duration (e.g. "45min", "60min")
Instances:
  - Training_Preparation_SJ_01 (Intensity "Moderate", Frequency 4)
  - Training_PreCompetition_SJ_01 (Intensity "High", Frequency 3)
  - Training_Competition_SJ_01 (Intensity "Peak", Frequency 1)
  - Training_Transition_SJ_01 (Intensity "Low", Frequency 2)

### 4. SportingEvent
Equestrian competitions.
Subclasses:
  - ShowJumping
  - Dressage
  - Cross (cross-country / eventing)
Properties:
  - hasDate (date)
  - hasLocation (string)
  - hasName (string)
Instances: Event_SJ_2026_01 (ShowJumping), Event_Dressage_2026_01 (Dressage),
Event_Cross_2026_01 (Cross)

### 5. ExperimentalDevices
Sensors and measuring equipment.
Subclasses:
  - InertialSensors
  - Camera
  - Video
  - Images
Properties:
  - hasSensorID (string): sensor identifier
  - hasFormat (string): file format
  - hasFileSize (integer): file size
  - hasCamView (string): camera view
  - ImageName (string): image name

### 6. Studies
Research projects, e.g. BienetreSaumur, HappyAthlete, CognitionEquine.

### 7. Topic
Research topics, e.g. HorseRiding, IndicateurPerformance, IndicateurBienetre.

### 8. IndicateurPerformance (performance indicators)
Subclasses: FacteurPhysique (physical), FacteurMental (mental),
FacteurTechnique (technical).

### 9. IndicateurBienetre (welfare indicators)
Subclasses: Alimentation (nutrition), Comportement (behaviour),
Hebergement (housing), HealthStatus.

## RELATIONS (object properties)

- CompetesIn: Horse -> SportingEvent (transitive).
  Horse1 CompetesIn Event_SJ_2026_01
- TrainsIn: Horse -> Training (transitive).
  Horse1 TrainsIn Training_Preparation_SJ_01
- dependsOn: Training -> SportingEvent (transitive).
  Training_Preparation_SJ_01 dependsOn Event_SJ_2026_01
- hasParticipatedTo: sub-property of dependsOn; participation in an event or study.
- AssociatedWith: association between entities, e.g. Horse <-> Rider (transitive).
  Horse1 AssociatedWith Rider1
- isAttachedTo: Horse -> Sensor (functional, transitive).
  Horse1 isAttachedTo Sensor123
- isUsedFor: ExperimentalDevices -> ExperimentalObjectif, sub-property of TrainsIn.
  Camera1 isUsedFor Study_BienetreSaumur
- hasThematique: Event/Study -> Topic (functional, transitive).
  Event_SJ_2026_01 hasThematique HorseRiding

## CURRENT DATA

Horse1 (name "Dakota")
  -> CompetesIn: Event_SJ_2026_01, Event_Dressage_2026_01, Event_Cross_2026_01
  -> TrainsIn: Training_Preparation_SJ_01, Training_PreCompetition_SJ_01,
               Training_Competition_SJ_01, Training_Transition_SJ_01
All trainings are for ShowJumping:
  - Training_Preparation_SJ_01: Frequency=4, Intensity="Moderate", Volume="45min"
  - Training_PreCompetition_SJ_01: Frequency=3, Intensity="High", Volume="60min"
  - Training_Competition_SJ_01: Frequency=1, Intensity="Peak", Volume="30min"
  - Training_Transition_SJ_01: Frequency=2, Intensity="Low", Volume="30min"

## RULES FOR WRITING QUERIES

1. NO GRAPH clause: all data lives in the default graph.
   Wrong:   WHERE { GRAPH <...> { ?s ?p ?o } }
   Correct: WHERE { ?s ?p ?o }
2. Use OPTIONAL for properties that may be missing:
   OPTIONAL { ?horse {p}:hasRace ?race }
3. Filter values with FILTER:
   FILTER(?frequency > 3), FILTER(?intensity = "High"), FILTER(CONTAINS(?name, "Dakota"))
4. Common patterns:
   - horses:        ?horse a {p}:Horse
   - trainings:     ?training a {p}:Training
   - events:        ?event a {p}:SportingEvent
   - relations:     ?horse {p}:TrainsIn ?training
5. Class hierarchies: use rdfs:subClassOf* to include subclasses,
   e.g. ?x a/rdfs:subClassOf* {p}:Training"#;

const EXEMPLARS: [(&str, &str, &str); 8] = [
    (
        "Which horse took part in which training session?",
        "- Classes: Horse, Training\n- Relations: TrainsIn\n- Properties: hasName (optional)",
        r#"SELECT ?horse ?horseName ?training
WHERE {
  ?horse rdf:type {p}:Horse .
  ?horse {p}:TrainsIn ?training .
  ?training rdf:type {p}:Training .
  OPTIONAL { ?horse {p}:hasName ?horseName . }
}"#,
    ),
    (
        "Which training sessions included high-intensity exercises?",
        "- Class: Training\n- Property: Intensity\n- Filter: Intensity = \"High\" or \"Peak\"",
        r#"SELECT ?training ?intensity ?frequency ?volume
WHERE {
  ?training rdf:type {p}:Training .
  ?training {p}:Intensity ?intensity .
  FILTER(?intensity = "High" || ?intensity = "Peak")
  OPTIONAL { ?training {p}:Frequency ?frequency . }
  OPTIONAL { ?training {p}:Volume ?volume . }
}"#,
    ),
    (
        "What are the different horse/rider pairings?",
        "- Classes: Horse, Rider\n- Relation: AssociatedWith\n- Properties: hasName for both",
        r#"SELECT ?horse ?horseName ?rider ?riderName
WHERE {
  ?horse rdf:type {p}:Horse .
  ?rider rdf:type {p}:Rider .
  ?horse {p}:AssociatedWith ?rider .
  OPTIONAL { ?horse {p}:hasName ?horseName . }
  OPTIONAL { ?rider {p}:hasName ?riderName . }
}"#,
    ),
    (
        "What breed is the horse?",
        "- Class: Horse\n- Properties: hasRace (optional), hasName",
        r#"SELECT ?horse ?horseName ?race
WHERE {
  ?horse rdf:type {p}:Horse .
  OPTIONAL { ?horse {p}:hasName ?horseName . }
  OPTIONAL { ?horse {p}:hasRace ?race . }
}"#,
    ),
    (
        "What are the events of the competitive season?",
        "- Class: SportingEvent (includes ShowJumping, Dressage, Cross)\n- Use subclasses",
        r#"SELECT ?event ?type
WHERE {
  ?event a ?type .
  ?type rdfs:subClassOf* {p}:SportingEvent .
}"#,
    ),
    (
        "What is the training frequency?",
        "- Class: Training\n- Property: Frequency",
        r#"SELECT ?training ?frequency ?intensity
WHERE {
  ?training rdf:type {p}:Training .
  ?training {p}:Frequency ?frequency .
  OPTIONAL { ?training {p}:Intensity ?intensity . }
}
ORDER BY DESC(?frequency)"#,
    ),
    (
        "Which sensors are attached to the horses?",
        "- Classes: Horse, Sensor (ExperimentalDevices)\n- Relation: isAttachedTo",
        r#"SELECT ?horse ?horseName ?sensor ?sensorID
WHERE {
  ?horse rdf:type {p}:Horse .
  ?sensor rdf:type {p}:InertialSensors .
  ?horse {p}:isAttachedTo ?sensor .
  OPTIONAL { ?horse {p}:hasName ?horseName . }
  OPTIONAL { ?sensor {p}:hasSensorID ?sensorID . }
}"#,
    ),
    (
        "Which trainings depend on which event?",
        "- Classes: Training, SportingEvent\n- Relation: dependsOn",
        r#"SELECT ?training ?event ?intensity
WHERE {
  ?training rdf:type {p}:Training .
  ?event rdf:type {p}:SportingEvent .
  ?training {p}:dependsOn ?event .
  OPTIONAL { ?training {p}:Intensity ?intensity . }
}"#,
    ),
];

pub(super) fn descriptor(namespace: &str, prefix: &str) -> OntologyDescriptor {
    let fill = |text: &str| text.replace("{ns}", namespace).replace("{p}", prefix);
    let header = format!(
        "PREFIX {prefix}: <{namespace}>\n\
         PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>\n\
         PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\n"
    );

    let exemplars = EXEMPLARS
        .iter()
        .map(|(question, analysis, body)| Exemplar {
            question: (*question).to_string(),
            analysis: (*analysis).to_string(),
            query: format!("{header}{}", fill(body)),
        })
        .collect();

    OntologyDescriptor::new(fill(SUMMARY), Prefix::new(prefix, namespace), exemplars)
}
