// Mirrors the tables owned by the clinical application. This crate only reads them.

diesel::table! {
    info_patients (id) {
        id -> Text,
        user_id -> Nullable<Text>,
        first_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
        phone -> Nullable<Text>,
        date_of_birth -> Nullable<Text>,
        age -> Nullable<Integer>,
        gender -> Nullable<Text>,
        address -> Nullable<Text>,
        height_cm -> Nullable<Integer>,
        weight_kg -> Nullable<Integer>,
        medical_history -> Nullable<Text>,
        emergency_contact -> Nullable<Text>,
        autres_maladies -> Nullable<Bool>,
        details_autres_maladies -> Nullable<Text>,
        tremblements -> Nullable<Bool>,
        rigidite -> Nullable<Bool>,
        bradykinesie -> Nullable<Bool>,
        difficulte_marche -> Nullable<Bool>,
        instabilite -> Nullable<Bool>,
        expression_faciale_reduite -> Nullable<Bool>,
        micrographie -> Nullable<Bool>,
        fatigue -> Nullable<Bool>,
        troubles_sommeil -> Nullable<Bool>,
        troubles_cognitifs -> Nullable<Bool>,
        depression_anxiete -> Nullable<Bool>,
        perte_odorat -> Nullable<Bool>,
        constipation -> Nullable<Bool>,
        problemes_urinaires -> Nullable<Bool>,
        douleurs -> Nullable<Bool>,
        observations -> Nullable<Text>,
        created_at -> Nullable<Text>,
        updated_at -> Nullable<Text>,
    }
}

diesel::table! {
    users (id) {
        id -> Text,
        email -> Nullable<Text>,
        role -> Nullable<Text>,
        first_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
    }
}

diesel::table! {
    medical_cases (id) {
        id -> Text,
        patient_id -> Nullable<Text>,
        neurologist_id -> Nullable<Text>,
        description -> Nullable<Text>,
        status -> Nullable<Text>,
        cnn_prediction -> Nullable<Text>,
        cnn_prediction_num -> Nullable<Double>,
        cnn_confidence -> Nullable<Double>,
        report_pdf -> Nullable<Text>,
        neurologist_report -> Nullable<Text>,
        created_at -> Nullable<Text>,
        updated_at -> Nullable<Text>,
    }
}

diesel::joinable!(info_patients -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(info_patients, users, medical_cases,);
